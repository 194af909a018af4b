//! Integration tests for subsys

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const APP: &str = r#"
[container]
name = "app"

[[extension]]
kind = "http"
depends_on = ["router", "log"]

[[extension]]
kind = "router"
depends_on = ["log"]

[[extension]]
kind = "log"
version = "1.2.0"
attach = true
members = ["write:1", "level"]
"#;

    /// Command isolated from the user's configuration
    fn subsys(temp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("subsys");
        cmd.env("SUBSYS_CONFIG", temp.path().join("config.toml"));
        cmd
    }

    fn manifest(temp: &TempDir, content: &str) -> PathBuf {
        let path = temp.path().join("subsys.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        let temp = TempDir::new().unwrap();
        subsys(&temp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("composition engine"));
    }

    #[test]
    fn version_displays() {
        let temp = TempDir::new().unwrap();
        subsys(&temp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("subsys"));
    }

    #[test]
    fn plan_prints_levels() {
        let temp = TempDir::new().unwrap();
        let path = manifest(&temp, APP);
        subsys(&temp)
            .args(["plan", "--format", "plain"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::eq("log\nrouter\nhttp\n"));
    }

    #[test]
    fn plan_json_includes_fingerprint() {
        let temp = TempDir::new().unwrap();
        let path = manifest(&temp, APP);
        let output = subsys(&temp)
            .args(["plan", "--format", "json"])
            .arg(&path)
            .output()
            .unwrap();
        assert!(output.status.success());

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["container"], "app");
        assert_eq!(value["fingerprint"].as_str().unwrap().len(), 12);
        assert_eq!(value["levels"][0][0], "log");
    }

    #[test]
    fn plan_reports_cycle_with_hint() {
        let temp = TempDir::new().unwrap();
        let path = manifest(
            &temp,
            r#"
[container]
name = "app"

[[extension]]
kind = "a"
depends_on = ["b"]

[[extension]]
kind = "b"
depends_on = ["a"]
"#,
        );
        subsys(&temp)
            .arg("plan")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn check_composes_manifest() {
        let temp = TempDir::new().unwrap();
        let path = manifest(&temp, APP);
        subsys(&temp)
            .arg("check")
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("3 capabilities composed"))
            .stdout(predicate::str::contains("write"));
    }

    #[test]
    fn check_reports_contract_violation() {
        let temp = TempDir::new().unwrap();
        let path = manifest(
            &temp,
            r#"
[container]
name = "app"

[[extension]]
kind = "store"
contract = "kv"
members = ["get:1"]

[contract.kv]
members = ["get:1", "put:2"]
"#,
        );
        subsys(&temp)
            .arg("check")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("missing member 'put'"));
    }

    #[test]
    fn check_unknown_contract_needs_flag() {
        let temp = TempDir::new().unwrap();
        let path = manifest(
            &temp,
            "[container]\nname = \"app\"\n\n[[extension]]\nkind = \"store\"\ncontract = \"kv\"\n",
        );
        subsys(&temp)
            .arg("check")
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown contract 'kv'"));

        subsys(&temp)
            .args(["check", "--allow-unknown-contracts"])
            .arg(&path)
            .assert()
            .success();
    }

    #[test]
    fn missing_manifest_fails() {
        let temp = TempDir::new().unwrap();
        subsys(&temp)
            .args(["plan", "does-not-exist.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("reading manifest"));
    }

    #[test]
    fn config_path() {
        let temp = TempDir::new().unwrap();
        subsys(&temp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        subsys(&temp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[engine]"));
    }

    #[test]
    fn config_init_writes_defaults() {
        let temp = TempDir::new().unwrap();
        subsys(&temp).args(["config", "init"]).assert().success();

        let written = std::fs::read_to_string(temp.path().join("config.toml")).unwrap();
        assert!(written.contains("cache_capacity = 64"));

        subsys(&temp)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }
}
