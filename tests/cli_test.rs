//! CLI Tests
//!
//! Runs the `chunk-uploadr` binary against temporary directories.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn source_file(dir: &TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let path = dir.path().join("source.bin");
        fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[test]
    fn test_help_lists_backends() {
        Command::cargo_bin("chunk-uploadr")
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--backend"))
            .stdout(predicate::str::contains("--concurrency"));
    }

    #[test]
    fn test_file_range_upload() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let (path, data) = source_file(&input, 5000);

        Command::cargo_bin("chunk-uploadr")
            .unwrap()
            .arg(&path)
            .arg("--dest")
            .arg(output.path())
            .args(["--chunk-size", "1024", "--concurrency", "3", "--log-level", "error"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Uploaded 5000 bytes"));

        assert_eq!(fs::read(output.path().join("source.bin")).unwrap(), data);
    }

    #[test]
    fn test_block_upload_with_name_and_metrics() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let (path, data) = source_file(&input, 3333);
        let config = input.path().join("config.yaml");
        fs::write(&config, "upload:\n  chunk_size: 1000\nmetrics:\n  enabled: true\n").unwrap();

        Command::cargo_bin("chunk-uploadr")
            .unwrap()
            .arg(&path)
            .arg("--dest")
            .arg(output.path())
            .args(["--name", "copy.bin", "--backend", "block", "--log-level", "error"])
            .arg("--config")
            .arg(&config)
            .assert()
            .success()
            .stdout(predicate::str::contains("Uploaded 3333 bytes"))
            .stdout(predicate::str::contains("chunk_uploadr_chunks_total"));

        assert_eq!(fs::read(output.path().join("copy.bin")).unwrap(), data);
    }

    #[test]
    fn test_missing_source_fails() {
        let output = TempDir::new().unwrap();
        Command::cargo_bin("chunk-uploadr")
            .unwrap()
            .arg("/nonexistent/source.bin")
            .arg("--dest")
            .arg(output.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to open"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let (path, _) = source_file(&input, 10);

        Command::cargo_bin("chunk-uploadr")
            .unwrap()
            .arg(&path)
            .arg("--dest")
            .arg(output.path())
            .args(["--concurrency", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("max_concurrency"));
    }
}
