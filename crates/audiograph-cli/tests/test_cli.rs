use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;

fn get_test_dir() -> PathBuf {
    let dir = PathBuf::from("target/tmp/tests");
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Path graph over `n` frames with 3 features, views at dilation 1 and 2.
fn example_json(n: usize) -> String {
    let features: Vec<Vec<f32>> = (0..n)
        .map(|i| vec![i as f32 * 0.1, 1.0 - i as f32 * 0.1, 0.5])
        .collect();
    let view = |d: usize| -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i.abs_diff(j) == d { 1.0 } else { 0.0 }).collect())
            .collect()
    };
    serde_json::json!({ "features": features, "adjacency": [view(1), view(2)] }).to_string()
}

const SMALL_CONFIG: &str = r#"{
    "input_feature_dim": 3,
    "initial_node_state_dim": 8,
    "message_dim": 8,
    "next_state_dim": 8,
    "num_classes": 5,
    "enable_dilation": true
}"#;

#[test]
fn test_cli_inspect() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let file = dir.join("inspect_example.json");
    fs::write(&file, example_json(5))?;

    let mut cmd = Command::cargo_bin("audiograph")?;
    cmd.arg("inspect").arg(&file);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Components: 1"))
        .stdout(predicate::str::contains("Node set frames: 5 nodes, 3 features"))
        .stdout(predicate::str::contains("Edge set view_0: 8 edges"))
        .stdout(predicate::str::contains("Edge set view_1: 6 edges"));

    fs::remove_file(file)?;
    Ok(())
}

#[test]
fn test_cli_schedule() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let config = dir.join("schedule_config.json");
    fs::write(&config, SMALL_CONFIG)?;

    let mut cmd = Command::cargo_bin("audiograph")?;
    cmd.arg("schedule").arg("--config").arg(&config);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Rounds: 4"))
        .stdout(predicate::str::contains("round 2: view_0"))
        .stdout(predicate::str::contains("round 3: view_1"));

    let mut cmd = Command::cargo_bin("audiograph")?;
    cmd.arg("schedule");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("round 1: view_0"));

    fs::remove_file(config)?;
    Ok(())
}

#[test]
fn test_cli_forward_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let config = dir.join("forward_config.json");
    let a = dir.join("forward_a.json");
    let b = dir.join("forward_b.json");
    fs::write(&config, SMALL_CONFIG)?;
    fs::write(&a, example_json(5))?;
    fs::write(&b, example_json(3))?;

    let run = || -> Result<String, Box<dyn std::error::Error>> {
        let output = Command::cargo_bin("audiograph")?
            .arg("forward")
            .arg(&a)
            .arg(&b)
            .arg("--config")
            .arg(&config)
            .arg("--seed")
            .arg("3")
            .output()?;
        assert!(output.status.success());
        Ok(String::from_utf8(output.stdout)?)
    };

    let first = run()?;
    let second = run()?;
    assert_eq!(first, second);

    let rows: serde_json::Value = serde_json::from_str(&first)?;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["logits"].as_array().unwrap().len(), 5);
    }

    for path in [config, a, b] {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[test]
fn test_cli_rejects_ragged_features() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let file = dir.join("ragged_example.json");
    fs::write(
        &file,
        r#"{"features": [[1.0, 2.0], [3.0]], "adjacency": [[[0.0, 1.0], [1.0, 0.0]]]}"#,
    )?;

    let mut cmd = Command::cargo_bin("audiograph")?;
    cmd.arg("inspect").arg(&file);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Bad feature matrix"));

    fs::remove_file(file)?;
    Ok(())
}

#[test]
fn test_cli_missing_view_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let config = dir.join("missing_view_config.json");
    let file = dir.join("missing_view_example.json");
    fs::write(&config, SMALL_CONFIG)?;
    fs::write(
        &file,
        r#"{"features": [[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]], "adjacency": [[[0.0, 1.0], [1.0, 0.0]]]}"#,
    )?;

    let mut cmd = Command::cargo_bin("audiograph")?;
    cmd.arg("forward").arg(&file).arg("--config").arg(&config);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("view_1"));

    fs::remove_file(config)?;
    fs::remove_file(file)?;
    Ok(())
}
