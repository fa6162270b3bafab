use indoc::indoc;

use super::VividMigration;

pub const M000001_MIGRATION: VividMigration = VividMigration {
    name: "m000001",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :VIVID_WORKER_SCHEMA._private_jobs (
                id bigserial primary key,
                queue_name text not null check (length(queue_name) between 1 and 128),
                task_identifier text not null check (length(task_identifier) between 1 and 128),
                payload json not null default '{}'::json,
                progress smallint not null default 0 check (progress between 0 and 100),
                result jsonb,
                run_at timestamptz not null default now(),
                attempts smallint not null default 0,
                max_attempts smallint not null default 1 check (max_attempts >= 1),
                backoff_type text not null default 'none' check (backoff_type in ('none', 'fixed', 'exponential')),
                backoff_delay_ms bigint not null default 0 check (backoff_delay_ms >= 0),
                last_error text,
                locked_at timestamptz,
                locked_by text,
                completed_at timestamptz,
                failed_at timestamptz,
                created_at timestamptz not null default now(),
                updated_at timestamptz not null default now()
            );
        "#},
        indoc! {r#"
            create index _private_jobs_dispatch_idx
                on :VIVID_WORKER_SCHEMA._private_jobs (queue_name, run_at, id)
                where completed_at is null and failed_at is null;
        "#},
        indoc! {r#"
            create function :VIVID_WORKER_SCHEMA.tg__update_timestamp() returns trigger as $$
            begin
                new.updated_at = greatest(now(), old.updated_at + interval '1 millisecond');
                return new;
            end;
            $$ language plpgsql;
        "#},
        indoc! {r#"
            create trigger _100_timestamps
                before update on :VIVID_WORKER_SCHEMA._private_jobs
                for each row
                execute procedure :VIVID_WORKER_SCHEMA.tg__update_timestamp();
        "#},
    ],
};
