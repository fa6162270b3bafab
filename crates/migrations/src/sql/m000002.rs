use indoc::indoc;

use super::VividMigration;

pub const M000002_MIGRATION: VividMigration = VividMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create function :VIVID_WORKER_SCHEMA.tg_jobs__after_insert() returns trigger as $$
            begin
                perform pg_notify('vivid_worker:jobs:insert', new.queue_name);
                return new;
            end;
            $$ language plpgsql;
        "#},
        indoc! {r#"
            create trigger _900_notify_worker
                after insert on :VIVID_WORKER_SCHEMA._private_jobs
                for each row
                execute procedure :VIVID_WORKER_SCHEMA.tg_jobs__after_insert();
        "#},
    ],
};
