// Ping probe via the system ping binary (one echo, -W deadline). Native ICMP
// needs raw sockets and a capability dance; the command path works unprivileged
// on every platform we deploy to.
// TODO: native ICMP fast path once the deployment images grant CAP_NET_RAW.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::ProbeError;

const MS_TO_NS: f64 = 1_000_000.0;

pub(super) async fn run(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let deadline_secs = timeout.as_secs().max(1);

    let child = Command::new("ping")
        .args(["-c", "1", "-W", &deadline_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    // The -W deadline should fire first; the outer timeout covers a ping
    // binary that ignores it.
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), child)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Transport(format!("exec ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
            || stderr.contains("timeout")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Transport(format!(
            "ping exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_ping_output(&stdout)
}

/// Pull the round-trip time out of ping's per-packet line.
fn parse_ping_output(output: &str) -> Result<f64, ProbeError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").unwrap());

    let caps = re.captures(output).ok_or_else(|| {
        ProbeError::Transport(format!("no rtt in ping output: {}", output.trim()))
    })?;
    let ms: f64 = caps["val"]
        .parse()
        .map_err(|e| ProbeError::Transport(format!("bad rtt value: {e}")))?;
    Ok(ms * MS_TO_NS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_ping_output() {
        let out = "64 bytes from 142.250.72.14: icmp_seq=1 ttl=116 time=12.4 ms";
        let ns = parse_ping_output(out).unwrap();
        assert_eq!(ns, 12.4 * MS_TO_NS);
    }

    #[test]
    fn parses_sub_millisecond_output() {
        let out = "64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time<0.1 ms";
        let ns = parse_ping_output(out).unwrap();
        assert!(ns > 0.0 && ns < MS_TO_NS);
    }

    #[test]
    fn missing_rtt_is_a_transport_error() {
        let result = parse_ping_output("ping: unknown host nowhere.invalid");
        assert!(matches!(result, Err(ProbeError::Transport(_))));
    }
}
