use std::path::PathBuf;
use tamper_triage::{
    batch::{parse_tasks, read_tasks, ImageTask},
    config::Batch,
};

#[test]
fn each_path_cell_becomes_a_task_in_row_then_column_order() {
    let raw = "\
task_id,total_screenshot_path,app_screenshot1_path,notes
p01,/data/a.png,/data/b.png,fine
p02,,/data/c.png,\"missing, total\"
";
    let tasks = parse_tasks(raw, &Batch::default()).unwrap();
    assert_eq!(
        tasks,
        vec![
            ImageTask::new("p01", "total_screenshot_path", "/data/a.png"),
            ImageTask::new("p01", "app_screenshot1_path", "/data/b.png"),
            ImageTask::new("p02", "app_screenshot1_path", "/data/c.png"),
        ]
    );
}

#[test]
fn placeholder_cells_are_skipped() {
    let raw = "task_id,screenshot\np01,NA\np02,nan\np03, \np04,shot.png\n";
    let cfg = Batch {
        path_columns: vec!["screenshot".into()],
        ..Batch::default()
    };
    let tasks = parse_tasks(raw, &cfg).unwrap();
    assert_eq!(tasks, vec![ImageTask::new("p04", "screenshot", "shot.png")]);
}

#[test]
fn missing_task_id_uses_row_index() {
    let raw = "screenshot\na.png\nb.png\n";
    let cfg = Batch {
        path_columns: vec!["screenshot".into()],
        ..Batch::default()
    };
    let tasks = parse_tasks(raw, &cfg).unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, vec!["row_0", "row_1"]);
}

#[test]
fn header_without_path_columns_is_rejected() {
    let err = parse_tasks("task_id,photo\np01,a.png\n", &Batch::default()).unwrap_err();
    assert!(err.to_string().contains("path columns"), "{err}");
}

#[test]
fn empty_table_is_rejected() {
    assert!(parse_tasks("", &Batch::default()).is_err());
}

#[test]
fn reads_a_table_with_byte_order_mark_and_crlf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.csv");
    std::fs::write(
        &path,
        "\u{feff}task_id,screenshot\r\np01,\"dir, with comma/a.png\"\r\n",
    )
    .unwrap();
    let cfg = Batch {
        path_columns: vec!["screenshot".into()],
        ..Batch::default()
    };
    let tasks = read_tasks(&path, &cfg).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, "p01");
    assert_eq!(tasks[0].path, PathBuf::from("dir, with comma/a.png"));
}
