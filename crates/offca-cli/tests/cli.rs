use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

use offca_core::jose::{jws, Jwk};

const PASSWORD: &str = "correct horse";

fn offca(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("offca").unwrap();
    cmd.env("OFFCA_CONFIG", dir.join("no-defaults.toml"))
        .env_remove("OFFCA_CA_CONFIG")
        .env_remove("OFFCA_PASSWORD_FILE")
        .env_remove("RUST_LOG");
    cmd
}

fn key_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("key.json");
    let key = Jwk::generate_p256().unwrap();
    std::fs::write(&path, serde_json::to_vec(&key).unwrap()).unwrap();
    path
}

fn future() -> String {
    (chrono::Utc::now().timestamp() + 300).to_string()
}

#[test]
fn jwt_sign_requires_audience() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_file(&dir);
    offca(dir.path())
        .args(["crypto", "jwt", "sign", "--key"])
        .arg(&key)
        .args(["--iss", "joe", "--sub", "subject", "--exp", &future()])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "offca: flag '--aud' is required unless '--subtle' is used",
        ));
}

#[test]
fn jwt_sign_key_flags_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    offca(dir.path())
        .args(["crypto", "jwt", "sign", "--key", "missing.json", "--jwks", "missing.jwks"])
        .args(["--kid", "k"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn jwt_sign_rejects_two_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_file(&dir);
    offca(dir.path())
        .args(["crypto", "jwt", "sign", "a.json", "b.json", "--key"])
        .arg(&key)
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("too many positional arguments"));
}

#[test]
fn jwt_sign_merges_stdin_payload() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_file(&dir);
    let output = offca(dir.path())
        .args(["crypto", "jwt", "sign", "--key"])
        .arg(&key)
        .args(["--iss", "joe", "--aud", "https://example.com", "--sub", "subject"])
        .args(["--exp", &future(), "--jti"])
        .write_stdin(r#"{"sub": "override", "scope": "read"}"#)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let token = String::from_utf8(output).unwrap();
    assert!(token.ends_with('\n'));
    let claims: Value = jws::peek_claims(token.trim()).unwrap();
    assert_eq!(claims["aud"], "https://example.com");
    assert_eq!(claims["sub"], "override");
    assert_eq!(claims["scope"], "read");
    assert_eq!(claims["jti"].as_str().unwrap().len(), 40);

    let header = jws::peek_header(token.trim()).unwrap();
    assert!(header.kid.is_some());
}

#[test]
fn jwt_sign_reads_only_pipes_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_file(&dir);
    let sign = || {
        let mut cmd = offca(dir.path());
        cmd.args(["crypto", "jwt", "sign", "--key"])
            .arg(&key)
            .args(["--iss", "joe", "--aud", "https://example.com", "--sub", "subject"])
            .args(["--exp", &future()]);
        cmd
    };

    // A character device is not a payload; reading it could block forever.
    #[cfg(unix)]
    let output = sign()
        .pipe_stdin("/dev/null")
        .unwrap()
        .timeout(Duration::from_secs(30))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    #[cfg(unix)]
    {
        let claims: Value = jws::peek_claims(String::from_utf8(output).unwrap().trim()).unwrap();
        assert!(claims.get("scope").is_none());
    }

    let payload = dir.path().join("payload.json");
    std::fs::write(&payload, r#"{"scope": "write"}"#).unwrap();
    let output = sign()
        .pipe_stdin(&payload)
        .unwrap()
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let claims: Value = jws::peek_claims(String::from_utf8(output).unwrap().trim()).unwrap();
    assert_eq!(claims["scope"], "write");

    let empty = dir.path().join("empty.json");
    std::fs::write(&empty, "").unwrap();
    sign().pipe_stdin(&empty).unwrap().assert().success();
}

#[test]
fn jwt_sign_hides_unsafe_flags() {
    let dir = tempfile::tempdir().unwrap();
    offca(dir.path())
        .args(["crypto", "jwt", "sign", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--subtle").not())
        .stdout(predicate::str::contains("--no-kid").not())
        .stdout(predicate::str::contains("--jwks"));

    // Still accepted when given.
    let key = key_file(&dir);
    let output = offca(dir.path())
        .args(["crypto", "jwt", "sign", "--subtle", "--no-kid", "--key"])
        .arg(&key)
        .write_stdin("")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let token = String::from_utf8(output).unwrap();
    assert!(jws::peek_header(token.trim()).unwrap().kid.is_none());
}

#[test]
fn ca_requires_a_configuration() {
    let dir = tempfile::tempdir().unwrap();
    offca(dir.path())
        .args(["ca", "token", "web.internal"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--ca-config"));
}

#[test]
fn ca_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let password_file = root.join("password");
    std::fs::write(&password_file, format!("{PASSWORD}\n")).unwrap();
    let ca_dir = root.join("ca");

    offca(root)
        .args(["ca", "init", "--name", "Test", "--dns", "ca.internal", "--dir"])
        .arg(&ca_dir)
        .arg("--password-file")
        .arg(&password_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Root fingerprint:"));

    let config = ca_dir.join("config/ca.json");
    let crt = root.join("web.crt");
    let key = root.join("web.key");
    offca(root)
        .args(["ca", "certificate", "web.internal"])
        .arg(&crt)
        .arg(&key)
        .args(["--san", "web.internal", "--san", "10.0.0.8", "--not-after", "2h"])
        .arg("--ca-config")
        .arg(&config)
        .env("OFFCA_PASSWORD_FILE", &password_file)
        .assert()
        .success();
    let chain = std::fs::read_to_string(&crt).unwrap();
    assert_eq!(chain.matches("BEGIN CERTIFICATE").count(), 2);

    // Refuses to clobber without --force.
    offca(root)
        .args(["ca", "certificate", "web.internal"])
        .arg(&crt)
        .arg(&key)
        .arg("--ca-config")
        .arg(&config)
        .env("OFFCA_PASSWORD_FILE", &password_file)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    let renewed = root.join("renewed.crt");
    offca(root)
        .args(["ca", "renew"])
        .arg(&crt)
        .arg(&key)
        .arg("--out")
        .arg(&renewed)
        .env("OFFCA_CA_CONFIG", &config)
        .env("OFFCA_PASSWORD_FILE", &password_file)
        .assert()
        .success();
    assert!(renewed.exists());

    offca(root)
        .args(["ca", "revoke", "--cert"])
        .arg(&crt)
        .arg("--key")
        .arg(&key)
        .args(["--reason-code", "4"])
        .env("OFFCA_CA_CONFIG", &config)
        .env("OFFCA_PASSWORD_FILE", &password_file)
        .assert()
        .success()
        .stderr(predicate::str::contains("has been revoked"));

    let token = offca(root)
        .args(["ca", "token", "web.internal", "--revoke"])
        .env("OFFCA_CA_CONFIG", &config)
        .env("OFFCA_PASSWORD_FILE", &password_file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let token = String::from_utf8(token).unwrap();
    let claims: Value = jws::peek_claims(token.trim()).unwrap();
    assert_eq!(claims["aud"], "https://ca.internal/revoke");
    assert_eq!(claims["iss"], "admin");
}
