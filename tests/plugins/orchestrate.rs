use rusqlite::Connection;
use serde_json::json;
use todoport::core::journal::{self, Journal};
use todoport::core::plan;
use todoport::core::store::{SqliteStore, Store};
use todoport::plugins::inspect::{SchemaInspector, verify_plan};
use todoport::plugins::mapping::ValueMapper;
use todoport::plugins::migrate::{MigrationContext, RowErrorKind};
use todoport::plugins::orchestrate::{RunOptions, TableStatus, render_text, run_all};
use tempfile::{TempDir, tempdir};

const DEST_SCHEMA: &str = r#"
CREATE TABLE profiles(id TEXT PRIMARY KEY, email TEXT NOT NULL, full_name TEXT, avatar_url TEXT, created_at TEXT);
CREATE TABLE organizations(id TEXT PRIMARY KEY, name TEXT NOT NULL, logo_url TEXT,
    created_by TEXT REFERENCES profiles(id), created_at TEXT);
CREATE TABLE organization_members(organization_id TEXT NOT NULL REFERENCES organizations(id),
    user_id TEXT NOT NULL REFERENCES profiles(id),
    role TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'member')), created_at TEXT,
    PRIMARY KEY (organization_id, user_id));
CREATE TABLE teams(id TEXT PRIMARY KEY, organization_id TEXT NOT NULL REFERENCES organizations(id),
    name TEXT NOT NULL, created_at TEXT);
CREATE TABLE team_members(team_id TEXT NOT NULL REFERENCES teams(id),
    user_id TEXT NOT NULL REFERENCES profiles(id),
    role TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'member')), created_at TEXT,
    PRIMARY KEY (team_id, user_id));
CREATE TABLE projects(id TEXT PRIMARY KEY, organization_id TEXT NOT NULL REFERENCES organizations(id),
    team_id TEXT REFERENCES teams(id), name TEXT NOT NULL, description TEXT,
    workflow_stages TEXT NOT NULL, created_at TEXT);
CREATE TABLE project_members(project_id TEXT NOT NULL REFERENCES projects(id),
    user_id TEXT NOT NULL REFERENCES profiles(id),
    role TEXT NOT NULL CHECK (role IN ('owner', 'admin', 'editor', 'reader')), created_at TEXT,
    PRIMARY KEY (project_id, user_id));
CREATE TABLE tasks(id TEXT PRIMARY KEY, project_id TEXT NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL, description TEXT, status TEXT NOT NULL, priority TEXT NOT NULL,
    assignee_id TEXT REFERENCES profiles(id), stage_id TEXT, due_date TEXT, slack_thread_ts TEXT,
    created_at TEXT);
CREATE TABLE subtasks(id TEXT PRIMARY KEY, task_id TEXT NOT NULL REFERENCES tasks(id),
    title TEXT NOT NULL, completed INTEGER NOT NULL, created_at TEXT);
CREATE TABLE comments(id TEXT PRIMARY KEY, task_id TEXT NOT NULL REFERENCES tasks(id),
    user_id TEXT REFERENCES profiles(id), content TEXT, created_at TEXT);
CREATE TABLE attachments(id TEXT PRIMARY KEY, task_id TEXT NOT NULL REFERENCES tasks(id),
    file_name TEXT, file_url TEXT, uploaded_by TEXT REFERENCES profiles(id), created_at TEXT);
CREATE TABLE activity_logs(id TEXT PRIMARY KEY, user_id TEXT REFERENCES profiles(id), action TEXT,
    details TEXT, entity_type TEXT, entity_id TEXT, created_at TEXT);
CREATE TABLE notifications(id TEXT PRIMARY KEY, user_id TEXT NOT NULL REFERENCES profiles(id),
    type TEXT NOT NULL, title TEXT, message TEXT, "read" INTEGER NOT NULL, created_at TEXT);
CREATE TABLE slack_integrations(id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id), webhook_url TEXT NOT NULL,
    channel_name TEXT, created_at TEXT);
"#;

const LEGACY_SCHEMA: &str = r#"
CREATE TABLE profiles(id TEXT PRIMARY KEY, email TEXT, full_name TEXT, avatar_url TEXT, created_at TEXT);
CREATE TABLE organizations(id TEXT PRIMARY KEY, name TEXT, logo_url TEXT, created_by TEXT, created_at TEXT);
CREATE TABLE organization_members(organization_id TEXT, user_id TEXT, role TEXT, created_at TEXT);
CREATE TABLE teams(id TEXT PRIMARY KEY, organization_id TEXT, name TEXT, created_at TEXT);
CREATE TABLE team_members(team_id TEXT, user_id TEXT, role TEXT, created_at TEXT);
CREATE TABLE projects(id TEXT PRIMARY KEY, organization_id TEXT, team_id TEXT, name TEXT,
    description TEXT, workflow_stages TEXT, created_at TEXT);
CREATE TABLE project_members(project_id TEXT, user_id TEXT, role TEXT, created_at TEXT);
CREATE TABLE tasks(id TEXT PRIMARY KEY, project_id TEXT, title TEXT, description TEXT, status TEXT,
    priority TEXT, assignee_id TEXT, stage_id TEXT, due_date TEXT, created_at TEXT);
CREATE TABLE subtasks(id TEXT PRIMARY KEY, task_id TEXT, title TEXT, completed INTEGER, created_at TEXT);
CREATE TABLE comments(id TEXT PRIMARY KEY, task_id TEXT, user_id TEXT, content TEXT, created_at TEXT);
CREATE TABLE attachments(id TEXT PRIMARY KEY, task_id TEXT, file_name TEXT, file_url TEXT,
    uploaded_by TEXT, created_at TEXT);
CREATE TABLE activity_logs(id TEXT PRIMARY KEY, user_id TEXT, action TEXT, details TEXT, task_id TEXT,
    created_at TEXT);
CREATE TABLE notifications(id TEXT PRIMARY KEY, user_id TEXT, type TEXT, title TEXT, message TEXT,
    created_at TEXT);
CREATE TABLE slack_integrations(id TEXT PRIMARY KEY, organization_id TEXT, webhook_url TEXT,
    channel_name TEXT, created_at TEXT);

INSERT INTO profiles VALUES ('u1', 'ana@example.com', 'Ana', NULL, '2024-01-01'),
                            ('u2', 'ben@example.com', 'Ben', NULL, '2024-01-02');
INSERT INTO organizations VALUES ('o1', 'Acme', NULL, 'u1', '2024-01-03');
INSERT INTO organization_members VALUES ('o1', 'u1', 'owner', '2024-01-03'),
                                        ('o1', 'u2', 'reader', '2024-01-04');
INSERT INTO teams VALUES ('t1', 'o1', 'Core', '2024-01-05');
INSERT INTO team_members VALUES ('t1', 'u2', 'editor', '2024-01-05');
INSERT INTO projects VALUES ('p1', 'o1', 't1', 'Launch', '', NULL, '2024-01-06');
INSERT INTO project_members VALUES ('p1', 'u1', 'owner', '2024-01-06'),
                                   ('p1', 'u2', 'member', '2024-01-06');
INSERT INTO tasks VALUES ('k1', 'p1', 'Write brief', NULL, NULL, 'high', 'u2', 's1', NULL, '2024-01-07');
INSERT INTO subtasks VALUES ('s1', 'k1', 'Outline', 1, '2024-01-07');
INSERT INTO comments VALUES ('c1', 'k1', 'u1', 'Looks good', '2024-01-08');
INSERT INTO attachments VALUES ('a1', 'k1', 'brief.pdf', 'https://files.test/brief.pdf', 'u1', '2024-01-08');
INSERT INTO activity_logs VALUES ('l1', 'u1', 'task_created', NULL, 'k1', '2024-01-07');
INSERT INTO notifications VALUES ('n1', 'u2', 'task_moved', 'Moved', 'k1 moved', '2024-01-09'),
                                 ('n2', 'u2', 'mention', 'Mention', 'hi', '2024-01-09'),
                                 ('n3', 'u2', 'unknown_type_x', '?', '?', '2024-01-09');
INSERT INTO slack_integrations VALUES ('w1', 'o1', 'https://hooks.slack.test/x', '#general', '2024-01-10');
"#;

fn setup(dest_sql: &str) -> (TempDir, SqliteStore) {
    let tmp = tempdir().expect("tempdir");
    let legacy_path = tmp.path().join("legacy.db");
    let app_path = tmp.path().join("app.db");
    Connection::open(&legacy_path)
        .expect("open legacy")
        .execute_batch(LEGACY_SCHEMA)
        .expect("legacy fixture");
    Connection::open(&app_path)
        .expect("open app")
        .execute_batch(dest_sql)
        .expect("dest schema");
    let store = SqliteStore::open(&app_path).expect("open store");
    store.attach(&legacy_path, "legacy").expect("attach legacy");
    (tmp, store)
}

fn count(store: &SqliteStore, table: &str) -> i64 {
    store
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM main.{table}"), [], |r| r.get(0))
        .expect("count")
}

macro_rules! context {
    ($store:expr, $inspector:ident, $mapper:ident, $ctx:ident) => {
        let $mapper = ValueMapper::builtin().unwrap();
        let $inspector = SchemaInspector::new(&$store);
        let $ctx = MigrationContext {
            source: &$store,
            destination: &$store,
            inspector: &$inspector,
            mapper: &$mapper,
            source_namespace: Some("legacy".to_string()),
        };
    };
}

#[test]
fn full_plan_migrates_in_order_and_skips_only_the_unmapped_notification() {
    let (_tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();

    let report = run_all(&ctx, &specs, &Journal::disabled("run-1"), RunOptions::default()).unwrap();

    let order: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
    let expected: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(order, expected);
    assert!(report.failed_tables().is_empty());
    assert!(report.warnings.is_empty());
    assert_eq!(report.totals.tables, 14);
    assert_eq!(report.totals.read, 19);
    assert_eq!(report.totals.written, 18);
    assert_eq!(report.totals.skipped, 1);
    assert!(!report.is_clean());

    let notifications = report.table("notifications").unwrap();
    assert_eq!(notifications.status, TableStatus::CompletedWithSkips);
    assert_eq!(notifications.errors[0].kind, RowErrorKind::Mapping);
    assert!(notifications.errors[0].cause.contains("unknown_type_x"));

    let tasks = report.table("tasks").unwrap();
    assert_eq!(tasks.status, TableStatus::Completed);
    assert_eq!(tasks.omitted_columns, vec!["slack_thread_ts"]);

    let roles = store
        .query("SELECT user_id, role FROM main.project_members ORDER BY user_id")
        .unwrap();
    assert_eq!(roles[0]["role"], json!("owner"));
    assert_eq!(roles[1]["role"], json!("editor"));
    let task = store.query("SELECT status, priority FROM main.tasks").unwrap();
    assert_eq!(task[0]["status"], json!("todo"));
    assert_eq!(task[0]["priority"], json!("high"));
    let org_roles = store
        .query("SELECT role FROM main.organization_members WHERE user_id = 'u2'")
        .unwrap();
    assert_eq!(org_roles[0]["role"], json!("member"));
}

#[test]
fn rerunning_the_full_plan_writes_nothing() {
    let (_tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();
    let journal = Journal::disabled("run-1");

    run_all(&ctx, &specs, &journal, RunOptions::default()).unwrap();
    let before = count(&store, "notifications");
    let second = run_all(&ctx, &specs, &journal, RunOptions::default()).unwrap();

    assert_eq!(second.totals.written, 0);
    assert_eq!(second.totals.unchanged, 18);
    assert_eq!(second.totals.skipped, 1);
    assert_eq!(count(&store, "notifications"), before);
    assert_eq!(count(&store, "profiles"), 2);
}

#[test]
fn failed_table_does_not_stop_the_run_and_dependents_are_flagged() {
    // No teams table; nothing else references it at the store level.
    let dest = DEST_SCHEMA
        .replace(
            "CREATE TABLE teams(id TEXT PRIMARY KEY, organization_id TEXT NOT NULL REFERENCES organizations(id),\n    name TEXT NOT NULL, created_at TEXT);",
            "",
        )
        .replace(" REFERENCES teams(id)", "");
    let (_tmp, store) = setup(&dest);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();

    let report = run_all(&ctx, &specs, &Journal::disabled("run-2"), RunOptions::default()).unwrap();

    assert_eq!(report.failed_tables(), vec!["teams"]);
    let teams = report.table("teams").unwrap();
    assert_eq!(teams.fatal.as_ref().unwrap().kind, "schema_precondition");

    let team_members = report.table("team_members").unwrap();
    assert_eq!(team_members.depends_on_failed, vec!["teams"]);
    assert_eq!(team_members.skipped, 1);
    assert_eq!(team_members.errors[0].kind, RowErrorKind::ForeignKey);

    let projects = report.table("projects").unwrap();
    assert_eq!(projects.depends_on_failed, vec!["teams"]);
    assert_eq!(projects.skipped, 1);

    // Tables that do not depend on teams still land.
    assert_eq!(report.table("slack_integrations").unwrap().status, TableStatus::Completed);
    assert_eq!(count(&store, "slack_integrations"), 1);
    assert_eq!(count(&store, "organization_members"), 2);
}

#[test]
fn dry_run_reports_counts_and_leaves_destination_untouched() {
    let (_tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();

    let report = run_all(
        &ctx,
        &specs,
        &Journal::disabled("dry"),
        RunOptions { dry_run: true },
    )
    .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.totals.written, 18);
    for spec in &specs {
        assert_eq!(count(&store, spec.destination_table()), 0, "{}", spec.name);
    }
    assert!(render_text(&report).contains("(dry run)"));
}

#[test]
fn journal_records_run_and_table_events() {
    let (tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();
    let path = tmp.path().join(".todoport/events.jsonl");
    let journal = Journal::new(&path, "run-journal");

    let report = run_all(&ctx, &specs, &journal, RunOptions::default()).unwrap();
    let events = journal::read_events(&path).unwrap();

    assert_eq!(report.run_id, "run-journal");
    assert_eq!(events.len(), 2 + 2 * specs.len());
    assert_eq!(events.first().unwrap().op, "run.start");
    assert_eq!(events.last().unwrap().op, "run.end");
    assert!(events.iter().all(|e| e.run_id == "run-journal"));
    let notifications_end = events
        .iter()
        .find(|e| e.op == "table.end" && e.subject == "notifications")
        .unwrap();
    assert_eq!(notifications_end.status, "completed_with_skips");
    assert_eq!(
        notifications_end.detail.as_ref().unwrap()["skipped_keys"],
        json!("id=n3")
    );
}

#[test]
fn fallback_mappings_are_counted_per_table() {
    let (tmp, store) = setup(DEST_SCHEMA);
    store
        .connection()
        .execute(
            "UPDATE legacy.organization_members SET role = 'guest' WHERE user_id = 'u2'",
            [],
        )
        .unwrap();
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();
    let path = tmp.path().join("events.jsonl");

    let report = run_all(&ctx, &specs, &Journal::new(&path, "fb"), RunOptions::default()).unwrap();

    let members = report.table("organization_members").unwrap();
    assert_eq!(members.status, TableStatus::Completed);
    assert_eq!(members.fallbacks.len(), 1);
    assert_eq!(members.fallbacks["role: guest -> member"], 1);
    assert!(report.table("project_members").unwrap().fallbacks.is_empty());
    assert!(render_text(&report).contains("fallback role: guest -> member (1 rows)"));

    let events = journal::read_events(&path).unwrap();
    let end = events
        .iter()
        .find(|e| e.op == "table.end" && e.subject == "organization_members")
        .unwrap();
    assert_eq!(
        end.detail.as_ref().unwrap()["fallbacks"],
        json!({"role: guest -> member": 1})
    );
}

#[test]
fn unwritable_journal_becomes_a_warning_not_an_abort() {
    let (tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let specs = plan::todoapp_plan().unwrap();
    // A directory cannot be opened for appending.
    let journal = Journal::new(tmp.path(), "no-journal");

    let report = run_all(&ctx, &specs, &journal, RunOptions::default()).unwrap();

    assert_eq!(report.totals.written, 18);
    assert_eq!(count(&store, "profiles"), 2);
    let journal_warnings: Vec<&String> = report
        .warnings
        .iter()
        .filter(|w| w.starts_with("journal:"))
        .collect();
    assert_eq!(journal_warnings.len(), 2 + 2 * specs.len());
    assert!(journal_warnings[0].contains("run.start"));
    assert!(journal_warnings.last().unwrap().contains("run.end"));
}

#[test]
fn invalid_plan_is_rejected_before_any_write() {
    let (_tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let mut specs = plan::todoapp_plan().unwrap();
    specs[0].conflict_keys = vec!["no_such_column".into()];

    let err = run_all(&ctx, &specs, &Journal::disabled("bad"), RunOptions::default()).unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(count(&store, "profiles"), 0);
}

#[test]
fn children_before_parents_produce_ordering_warnings() {
    let (_tmp, store) = setup(DEST_SCHEMA);
    context!(store, inspector, mapper, ctx);
    let mut specs = plan::todoapp_plan().unwrap();
    specs.swap(0, 1); // organizations before profiles

    let report = run_all(&ctx, &specs, &Journal::disabled("order"), RunOptions::default()).unwrap();
    assert!(report.warnings.iter().any(|w| w.contains("profiles")));
    // The organization references a profile that did not exist yet.
    let orgs = report.table("organizations").unwrap();
    assert_eq!(orgs.errors[0].kind, RowErrorKind::ForeignKey);
}

#[test]
fn verify_plan_reports_missing_tables_and_optional_columns() {
    let dest = DEST_SCHEMA.replace(
        "CREATE TABLE slack_integrations(id TEXT PRIMARY KEY,\n    organization_id TEXT NOT NULL REFERENCES organizations(id), webhook_url TEXT NOT NULL,\n    channel_name TEXT, created_at TEXT);",
        "",
    );
    let (_tmp, store) = setup(&dest);
    let inspector = SchemaInspector::new(&store);
    let specs = plan::todoapp_plan().unwrap();

    let verification = verify_plan(&inspector, &specs).unwrap();
    assert!(!verification.ok);
    let slack = verification
        .tables
        .iter()
        .find(|t| t.table == "slack_integrations")
        .unwrap();
    assert!(!slack.exists);
    let orgs = verification
        .tables
        .iter()
        .find(|t| t.table == "organizations")
        .unwrap();
    assert!(orgs.ok());
    assert_eq!(orgs.missing_optional, vec!["favicon_url"]);
}
