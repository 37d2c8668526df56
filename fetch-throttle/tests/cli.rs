#[cfg(test)]
mod cli {
    use assert_cmd::{Command, cargo::cargo_bin_cmd};
    use http::StatusCode;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use std::{error::Error, io::Write, time::Duration};
    use tempfile::NamedTempFile;
    use test_utils::mock_server;

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    /// A command which is not influenced by the environment of the test run
    fn main_command() -> Command {
        let mut cmd = cargo_bin_cmd!();
        cmd.env_remove("RUST_LOG")
            .env_remove("FETCH_THROTTLE_MAX_DOWNLOADS");
        cmd
    }

    #[test]
    fn test_help() {
        main_command()
            .arg("--help")
            .assert()
            .success()
            .stdout(contains("--max-downloads"))
            .stdout(contains("PATTERN=PRIORITY"));
    }

    #[test]
    fn test_urls_are_required() {
        main_command().assert().failure();
    }

    #[tokio::test]
    async fn test_download_success() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK);

        main_command()
            .arg(mock_server.uri())
            .assert()
            .success()
            .stdout(format!("200 {}\n", mock_server.uri()));

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_download_sets_exit_code() -> Result<()> {
        let missing = mock_server!(StatusCode::NOT_FOUND);
        let ok = mock_server!(StatusCode::OK);

        let result = main_command()
            .arg(missing.uri())
            .arg(ok.uri())
            .assert()
            .code(2);

        // Lines come in the order the URLs were given
        let stdout = String::from_utf8(result.get_output().stdout.clone())?;
        assert_eq!(
            stdout,
            format!("404 {}\n200 {}\n", missing.uri(), ok.uri())
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrency_limit() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(100)));
        let uri = mock_server.uri();

        main_command()
            .arg("-v")
            .arg("--max-downloads")
            .arg("1")
            .arg(format!("{uri}/a"))
            .arg(format!("{uri}/b"))
            .arg(format!("{uri}/c"))
            .assert()
            .success()
            .stderr(contains("3 downloads, 2 had to wait"));

        Ok(())
    }

    #[tokio::test]
    async fn test_unthrottled_downloads_never_wait() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(100)));
        let uri = mock_server.uri();

        main_command()
            .arg("-v")
            .arg("-m")
            .arg("1")
            .arg("--priority")
            .arg("unthrottled")
            .arg(format!("{uri}/a"))
            .arg(format!("{uri}/b"))
            .assert()
            .success()
            .stderr(contains("2 downloads, 0 had to wait"));

        Ok(())
    }

    #[test]
    fn test_invalid_filter_flag() {
        main_command()
            .arg("--filter")
            .arg("no-priority")
            .arg("https://example.com")
            .assert()
            .failure()
            .stderr(contains("PATTERN=PRIORITY"));
    }

    #[test]
    fn test_invalid_priority_flag() {
        main_command()
            .arg("--priority")
            .arg("urgent")
            .arg("https://example.com")
            .assert()
            .failure();
    }

    #[test]
    fn test_missing_config_file() {
        main_command()
            .arg("--config")
            .arg("/nonexistent/fetch-throttle.toml")
            .arg("https://example.com")
            .assert()
            .code(3)
            .stderr(contains("Error while loading config"));
    }

    #[test]
    fn test_invalid_filter_in_config_file() -> Result<()> {
        let mut config = NamedTempFile::new()?;
        writeln!(
            config,
            "[[priority_filters]]\npattern = '('\npriority = \"low\""
        )?;

        main_command()
            .arg("--config")
            .arg(config.path())
            .arg("https://example.com")
            .assert()
            .code(3);

        Ok(())
    }

    #[test]
    fn test_unknown_config_key() -> Result<()> {
        let mut config = NamedTempFile::new()?;
        writeln!(config, "max_connections = 2")?;

        main_command()
            .arg("--config")
            .arg(config.path())
            .arg("https://example.com")
            .assert()
            .code(3);

        Ok(())
    }

    #[tokio::test]
    async fn test_config_file_is_applied() -> Result<()> {
        let mock_server = mock_server!(StatusCode::OK, set_delay(Duration::from_millis(100)));
        let uri = mock_server.uri();

        let mut config = NamedTempFile::new()?;
        writeln!(config, "max_downloads = 1\nbusy_window = \"10ms\"")?;

        main_command()
            .arg("-v")
            .arg("--config")
            .arg(config.path())
            .arg(format!("{uri}/a"))
            .arg(format!("{uri}/b"))
            .assert()
            .success()
            .stderr(contains("2 downloads, 1 had to wait"));

        Ok(())
    }
}
