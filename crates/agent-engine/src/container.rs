//! Container engine invocation: the bit-exact security envelope of
//! spec.md §4.3 and the pull/run/kill subprocess wrappers. Grounded on the
//! teacher's `tokio::process::Command` usage pattern, generalized from a
//! native-library call to a `docker` CLI invocation.

use std::time::Duration;

use agent_core::model::JobManifest;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

const PULL_TIMEOUT: Duration = Duration::from_secs(600);
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from invoking the container engine.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker pull timed out after {0:?}")]
    PullTimedOut(Duration),
    #[error("docker pull exited with status {0:?}: {1}")]
    PullFailed(Option<i32>, String),
    #[error("docker kill exited with status {0:?}: {1}")]
    KillFailed(Option<i32>, String),
    #[error("failed to spawn docker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// `docker pull <image>@sha256:<hex>`, with a 600s timeout.
pub async fn pull_image(image: &str, digest: &str) -> Result<(), ContainerError> {
    let reference = format!("{image}@{digest}");
    let run = async {
        Command::new("docker")
            .arg("pull")
            .arg(&reference)
            .output()
            .await
            .map_err(ContainerError::Spawn)
    };

    let output = timeout(PULL_TIMEOUT, run)
        .await
        .map_err(|_| ContainerError::PullTimedOut(PULL_TIMEOUT))??;

    if !output.status.success() {
        return Err(ContainerError::PullFailed(
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Build the exact `docker run` argument list spec.md §4.3 specifies, in
/// order: ephemeral lifetime, name, GPU device, memory/swap limit, PID cap,
/// network, capability drop, no-new-privileges, read-only root, tmpfs,
/// input/output mounts, sanitized env, digest-pinned image, argv.
pub fn build_run_args(
    manifest: &JobManifest,
    digest: &str,
    sanitized_env: &[(String, String)],
    workdir: &crate::workdir::JobWorkdir,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        manifest.container_name(),
        "--gpus".to_string(),
        format!("device={}", manifest.gpu_index),
        "--memory".to_string(),
        manifest.ram_limit_bytes().to_string(),
        "--memory-swap".to_string(),
        manifest.ram_limit_bytes().to_string(),
        "--pids-limit".to_string(),
        "512".to_string(),
        "--network".to_string(),
        "bridge".to_string(),
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
        "--read-only".to_string(),
        "--tmpfs".to_string(),
        "/tmp:rw,noexec,nosuid,size=1g".to_string(),
        "--volume".to_string(),
        format!("{}:/input:ro", workdir.input_dir().display()),
        "--volume".to_string(),
        format!("{}:/output:rw", workdir.output_dir().display()),
    ];

    for (k, v) in sanitized_env {
        args.push("--env".to_string());
        args.push(format!("{k}={v}"));
    }

    args.push(format!("{}@{}", manifest.docker_image, digest));
    args.extend(manifest.command.iter().cloned());
    args
}

/// Outcome of a container invocation.
pub struct RunOutcome {
    pub exit_code: i32,
    pub logs: String,
    pub timed_out: bool,
}

/// Run the container synchronously (blocks this task, not peers) until exit
/// or `timeout_secs` elapses. On timeout, the container is killed by name
/// and the result carries exit code -1 with `DURATION_LIMIT_EXCEEDED`.
pub async fn run_container(
    manifest: &JobManifest,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<RunOutcome, ContainerError> {
    let mut child = Command::new("docker")
        .args(&args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(ContainerError::Spawn)?;

    let wait = child.wait_with_output();
    match timeout(Duration::from_secs(timeout_secs), wait).await {
        Ok(Ok(output)) => {
            let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
            logs.push_str(&String::from_utf8_lossy(&output.stderr));
            truncate_tail(&mut logs, 5000);
            Ok(RunOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                logs,
                timed_out: false,
            })
        }
        Ok(Err(err)) => Err(ContainerError::Spawn(err)),
        Err(_) => {
            let _ = kill_container(&manifest.container_name()).await;
            Ok(RunOutcome {
                exit_code: -1,
                logs: "DURATION_LIMIT_EXCEEDED".to_string(),
                timed_out: true,
            })
        }
    }
}

/// `docker kill <name>`, with a 5s timeout on the kill command itself.
pub async fn kill_container(name: &str) -> Result<(), ContainerError> {
    let run = async {
        Command::new("docker")
            .arg("kill")
            .arg(name)
            .output()
            .await
            .map_err(ContainerError::Spawn)
    };

    let output = match timeout(KILL_TIMEOUT, run).await {
        Ok(res) => res?,
        Err(_) => return Ok(()), // best-effort; container may already be gone.
    };

    if !output.status.success() {
        return Err(ContainerError::KillFailed(
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

fn truncate_tail(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let start = s.len() - max_bytes;
    let boundary = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(start);
    *s = s[boundary..].to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> JobManifest {
        let raw = agent_core::model::RawManifest {
            id: Some("j1".to_string()),
            gpu_index: Some(2),
            ram_limit_gb: Some(1.0),
            docker_image: Some("alpine".to_string()),
            docker_image_sha256: Some(format!("sha256:{}", "a".repeat(64))),
            command: Some(vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()]),
            ..Default::default()
        };
        JobManifest::from_raw(raw).unwrap()
    }

    #[test]
    fn run_args_follow_the_bit_exact_envelope_order() {
        let manifest = sample_manifest();
        let dir = tempfile::tempdir().unwrap();
        let workdir = crate::workdir::JobWorkdir::new_in(dir.path()).unwrap();
        let digest = agent_core::env_sanitize::validate_digest(&manifest.docker_image_sha256).unwrap();
        let args = build_run_args(&manifest, &digest, &[], &workdir);

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"device=2".to_string()));
        assert!(args.contains(&(1024u64 * 1024 * 1024).to_string()));
        assert!(args.contains(&"--cap-drop".to_string()));
        assert!(args.contains(&"ALL".to_string()));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.iter().any(|a| a.ends_with(":/input:ro")));
        assert!(args.iter().any(|a| a.ends_with(":/output:rw")));
        let image_idx = args.iter().position(|a| a.contains('@')).unwrap();
        assert_eq!(args[image_idx + 1], "sh");
    }

    #[test]
    fn truncate_tail_keeps_only_final_bytes() {
        let mut s = "x".repeat(6000);
        truncate_tail(&mut s, 5000);
        assert_eq!(s.len(), 5000);
    }
}
