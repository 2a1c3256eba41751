mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use test_support::{request_err_code, request_ok, select_workspace, spawn_sidecar, temp_dir};
use zip::write::FileOptions;
use zip::ZipWriter;

fn seed_board(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
) {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "students.add",
        json!({ "names": ["小明", "小红", "小刚"] }),
    );
    let _ = request_ok(stdin, reader, "s2", "picker.pick", json!({ "count": 2 }));
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "problems.setCount",
        json!({ "count": 15 }),
    );
    for _ in 0..3 {
        let _ = request_ok(
            stdin,
            reader,
            "s4",
            "problems.increment",
            json!({ "number": 7 }),
        );
    }
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "settings.update",
        json!({ "settings": { "hotThreshold": 2, "animationSpeed": "fast" } }),
    );
}

#[test]
fn snapshot_export_import_reproduces_the_board() {
    let source = temp_dir("classboard-snap-src");
    let target = temp_dir("classboard-snap-dst");
    let snap_path = source.join("board.json");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &source);
    seed_board(&mut stdin, &mut reader);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "snapshot.export",
        json!({ "path": snap_path.to_string_lossy() }),
    );
    assert_eq!(exported.get("students").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        exported.get("problemCount").and_then(|v| v.as_u64()),
        Some(15)
    );

    // The exported file is plain JSON with the full board shape.
    let text = std::fs::read_to_string(&snap_path).expect("read snapshot");
    let snap: serde_json::Value = serde_json::from_str(&text).expect("parse snapshot");
    assert_eq!(
        snap.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(3)
    );
    assert_eq!(
        snap.get("problems")
            .and_then(|p| p.get("7"))
            .and_then(|v| v.as_i64()),
        Some(3)
    );

    // Import into a fresh workspace and compare every surface.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "snapshot.import",
        json!({ "path": snap_path.to_string_lossy() }),
    );
    assert_eq!(imported.get("students").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        imported.get("calledStudents").and_then(|v| v.as_u64()),
        Some(2)
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(3));

    let history = request_ok(&mut stdin, &mut reader, "5", "picker.history", json!({}));
    assert_eq!(history.get("count").and_then(|v| v.as_u64()), Some(2));

    let board = request_ok(&mut stdin, &mut reader, "6", "problems.list", json!({}));
    assert_eq!(board.get("problemCount").and_then(|v| v.as_i64()), Some(15));
    assert_eq!(board.get("totalWrong").and_then(|v| v.as_i64()), Some(3));

    let settings = request_ok(&mut stdin, &mut reader, "7", "settings.get", json!({}));
    let s = settings.get("settings").unwrap();
    assert_eq!(s.get("hotThreshold").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(s.get("animationSpeed").and_then(|v| v.as_str()), Some("fast"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn importing_garbage_reports_bad_snapshot() {
    let workspace = temp_dir("classboard-snap-bad");
    let garbage = workspace.join("not-a-snapshot.json");
    std::fs::write(&garbage, "{ not json").expect("write garbage");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "snapshot.import",
        json!({ "path": garbage.to_string_lossy() }),
    );
    assert_eq!(code, "bad_snapshot");

    // Missing fields fall back to defaults rather than failing.
    let partial = workspace.join("partial.json");
    std::fs::write(&partial, r#"{ "students": ["甲", "乙"] }"#).expect("write partial");
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "snapshot.import",
        json!({ "path": partial.to_string_lossy() }),
    );
    assert_eq!(imported.get("students").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        imported.get("problemCount").and_then(|v| v.as_i64()),
        Some(20)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn backup_bundle_roundtrip_restores_the_workspace() {
    let source = temp_dir("classboard-backup-src");
    let target = temp_dir("classboard-backup-dst");
    let bundle = source.join("board-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &source);
    seed_board(&mut stdin, &mut reader);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("classboard-workspace-v1")
    );
    assert!(exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.len() == 64)
        .unwrap_or(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(3));
    let board = request_ok(&mut stdin, &mut reader, "5", "problems.list", json!({}));
    assert_eq!(board.get("totalWrong").and_then(|v| v.as_i64()), Some(3));

    drop(stdin);
    let _ = child.wait();
}

fn write_bundle(path: &Path, format: &str, db_sha256: &str, db_bytes: &[u8]) {
    let file = std::fs::File::create(path).expect("create bundle");
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default();
    let manifest = json!({
        "format": format,
        "version": 1,
        "dbSha256": db_sha256,
    });
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/classboard.sqlite3", opts).expect("db entry");
    zip.write_all(db_bytes).expect("write db entry");
    zip.finish().expect("finish bundle");
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[test]
fn bundles_with_wrong_format_or_bad_digest_are_rejected() {
    let workspace = temp_dir("classboard-backup-reject");
    let wrong_format = workspace.join("wrong-format.zip");
    let bad_digest = workspace.join("bad-digest.zip");

    let db_bytes = b"placeholder database contents";
    write_bundle(
        &wrong_format,
        "some-other-app-v9",
        &sha256_hex(db_bytes),
        db_bytes,
    );
    // Manifest digest computed over different bytes than the entry holds.
    write_bundle(
        &bad_digest,
        "classboard-workspace-v1",
        &sha256_hex(b"the bytes the manifest promised"),
        db_bytes,
    );

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.add",
        json!({ "names": ["小红"] }),
    );

    for (i, bundle) in [&wrong_format, &bad_digest].iter().enumerate() {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            &format!("imp-{}", i),
            "backup.import",
            json!({ "inPath": bundle.to_string_lossy() }),
        );
        assert_eq!(code, "restore_failed");
    }

    // Neither rejected bundle touched the workspace database.
    let listed = request_ok(&mut stdin, &mut reader, "check", "students.list", json!({}));
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn corrupt_bundle_import_fails_and_daemon_stays_usable() {
    let workspace = temp_dir("classboard-backup-corrupt");
    let bogus = workspace.join("bogus.zip");
    std::fs::write(&bogus, b"definitely not a zip archive").expect("write bogus");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.add",
        json!({ "names": ["小明"] }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "backup.import",
        json!({ "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(code, "restore_failed");

    // The previous database is still there and serving requests.
    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(1));

    drop(stdin);
    let _ = child.wait();
}
