//! Integration tests for hudson-maven

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn hudson_maven(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("hudson-maven");
        cmd.env("HUDSON_MAVEN_CONFIG", config);
        cmd.env_remove("MAVEN_HOME");
        cmd
    }

    /// A config file whose state directory lives inside `dir`
    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("config.toml");
        let state = dir.join("state");
        fs::write(
            &path,
            format!("[general]\nstate_dir = {:?}\n", state.display().to_string()),
        )
        .unwrap();
        path
    }

    fn write_workspace(dir: &Path) {
        fs::create_dir_all(dir.join("core")).unwrap();
        fs::write(
            dir.join("pom.xml"),
            r#"<project>
  <groupId>org.acme</groupId>
  <artifactId>parent</artifactId>
  <version>1.0</version>
  <packaging>pom</packaging>
  <modules><module>core</module></modules>
</project>"#,
        )
        .unwrap();
        fs::write(
            dir.join("core/pom.xml"),
            r#"<project>
  <parent><groupId>org.acme</groupId><artifactId>parent</artifactId><version>1.0</version></parent>
  <artifactId>core</artifactId>
</project>"#,
        )
        .unwrap();
    }

    #[test]
    fn help_displays() {
        let tmp = TempDir::new().unwrap();
        hudson_maven(&tmp.path().join("config.toml"))
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("out-of-process Maven builds"));
    }

    #[test]
    fn version_displays() {
        let tmp = TempDir::new().unwrap();
        hudson_maven(&tmp.path().join("config.toml"))
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("hudson-maven"));
    }

    #[test]
    fn config_path() {
        let tmp = TempDir::new().unwrap();
        hudson_maven(&tmp.path().join("config.toml"))
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let tmp = TempDir::new().unwrap();
        hudson_maven(&tmp.path().join("config.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[maven]"));
    }

    #[test]
    fn config_init_writes_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        hudson_maven(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.exists());

        hudson_maven(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn parse_lists_modules() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        write_workspace(&ws);
        let config = write_config(tmp.path());

        hudson_maven(&config)
            .arg("parse")
            .arg(&ws)
            .assert()
            .success()
            .stdout(predicate::str::contains("org.acme:parent"))
            .stdout(predicate::str::contains("org.acme:core"))
            .stdout(predicate::str::contains("Build order:"));
    }

    #[test]
    fn parse_json_output() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        write_workspace(&ws);
        let config = write_config(tmp.path());

        let output = hudson_maven(&config)
            .arg("parse")
            .arg(&ws)
            .args(["-f", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["modules"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn parse_missing_root_pom_fails() {
        let tmp = TempDir::new().unwrap();
        let config = write_config(tmp.path());

        hudson_maven(&config)
            .arg("parse")
            .arg(tmp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn build_without_installation_fails() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");
        write_workspace(&ws);
        let config = write_config(tmp.path());

        hudson_maven(&config)
            .arg("build")
            .arg(&ws)
            .assert()
            .failure()
            .stdout(predicate::str::contains(
                "A Maven installation needs to be available",
            ))
            .stdout(predicate::str::contains("Finished: FAILURE"));
    }

    /// A Maven installation whose `mvn` prints a two module reactor
    #[cfg(unix)]
    fn write_fake_maven(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;

        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::create_dir_all(dir.join("boot")).unwrap();
        fs::write(dir.join("boot/plexus-classworlds-2.5.2.jar"), b"").unwrap();
        let script = dir.join("bin/mvn");
        fs::write(
            &script,
            r#"#!/bin/sh
echo "[INFO] Scanning for projects..."
for module in core app; do
  echo "[INFO] ------------------< org.example:$module >------------------"
  echo "[INFO] Building $module 1.0"
  echo "[INFO] --- maven-compiler-plugin:3.11.0:compile (default-compile) @ $module ---"
  echo "compiling $module sources"
done
echo "[INFO] BUILD SUCCESS"
"#,
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    fn write_reactor(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("pom.xml"),
            r#"<project>
  <groupId>org.example</groupId>
  <artifactId>parent</artifactId>
  <version>1.0</version>
  <packaging>pom</packaging>
  <modules><module>core</module><module>app</module></modules>
</project>"#,
        )
        .unwrap();
        for module in ["core", "app"] {
            fs::create_dir_all(dir.join(module)).unwrap();
            fs::write(
                dir.join(module).join("pom.xml"),
                format!(
                    r#"<project>
  <parent><groupId>org.example</groupId><artifactId>parent</artifactId><version>1.0</version></parent>
  <artifactId>{module}</artifactId>
</project>"#
                ),
            )
            .unwrap();
        }
    }

    #[cfg(unix)]
    #[test]
    fn build_splits_worker_output_into_module_logs() {
        let tmp = TempDir::new().unwrap();
        let maven = tmp.path().join("maven");
        write_fake_maven(&maven);
        write_reactor(&tmp.path().join("ws"));
        let config = write_config(tmp.path());

        hudson_maven(&config)
            .current_dir(tmp.path())
            .args(["build", "ws", "--maven-home"])
            .arg(&maven)
            .assert()
            .success()
            .stdout(predicate::str::contains("Finished: SUCCESS"));

        let builds = tmp.path().join("state/projects/ws/builds/1");
        let core = fs::read_to_string(builds.join("org.example$core.log")).unwrap();
        let app = fs::read_to_string(builds.join("org.example$app.log")).unwrap();

        assert!(core.contains("(default-compile) @ core ---"), "{core}");
        assert!(core.contains("compiling core sources"), "{core}");
        assert!(!core.contains("app"), "{core}");

        assert!(app.contains("(default-compile) @ app ---"), "{app}");
        assert!(app.contains("compiling app sources"), "{app}");
        assert!(!app.contains("core"), "{app}");
    }
}
