use std::fmt::Write;

use shipwright_state::{AttemptKind, DeploymentAttempt};

use super::Settings;

pub fn history(settings: &Settings, service: &str, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let attempts = settings.open_state()?.list_attempts(service)?;
    let attempts = most_recent(&attempts, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(attempts)?);
    } else if attempts.is_empty() {
        println!("No deployments recorded for {service}");
    } else {
        print!("{}", render_text(attempts));
    }
    Ok(())
}

fn most_recent(attempts: &[DeploymentAttempt], limit: Option<usize>) -> &[DeploymentAttempt] {
    match limit {
        Some(n) if n < attempts.len() => &attempts[attempts.len() - n..],
        _ => attempts,
    }
}

/// One line per attempt, oldest first.
pub fn render_text(attempts: &[DeploymentAttempt]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:>8}  {:<12}  {:<11}  {:>5}  {:>9}  {}",
        "ID", "REVISION", "KIND", "STATUS", "POLLS", "DURATION", "ERROR"
    );
    for a in attempts {
        let kind = match &a.kind {
            AttemptKind::Deploy => "deploy".to_string(),
            AttemptKind::Rollback { restored_revision, .. } => format!("rollback→{restored_revision}"),
        };
        let duration = a
            .finished_at
            .map(|f| format!("{:.1}s", f.saturating_sub(a.started_at) as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let error = a.last_error.as_ref().map(ToString::to_string).unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>4}  {:>8}  {:<12}  {:<11}  {:>5}  {:>9}  {}",
            a.id,
            a.target_revision,
            kind,
            a.status.label(),
            a.polls,
            duration,
            error
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_state::{AttemptError, AttemptStatus};

    fn attempt(id: u64, revision: u64, kind: AttemptKind, status: AttemptStatus, error: Option<AttemptError>) -> DeploymentAttempt {
        let mut a = DeploymentAttempt::new("svc1", revision, "localhost:5000/svc1:v", kind);
        a.id = id;
        a.polls = 3;
        a.started_at = 1_000;
        a.finish(status, error);
        a.finished_at = Some(3_500);
        a
    }

    fn sample() -> Vec<DeploymentAttempt> {
        vec![
            attempt(1, 1, AttemptKind::Deploy, AttemptStatus::Converged, None),
            attempt(2, 2, AttemptKind::Deploy, AttemptStatus::Failed, Some(AttemptError::ConvergenceTimeout)),
            attempt(
                3,
                3,
                AttemptKind::Rollback {
                    from_revision: 2,
                    restored_revision: 1,
                },
                AttemptStatus::RolledBack,
                None,
            ),
        ]
    }

    #[test]
    fn limit_keeps_newest() {
        let all = sample();
        let ids: Vec<u64> = most_recent(&all, Some(2)).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(most_recent(&all, Some(10)).len(), 3);
        assert_eq!(most_recent(&all, None).len(), 3);
    }

    #[test]
    fn text_has_one_row_per_attempt() {
        let text = render_text(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("STATUS"));
        assert!(lines[1].contains("converged"));
        assert!(lines[2].contains("convergence timeout"));
        assert!(lines[3].contains("rollback→1"));
        assert!(lines[3].contains("rolled_back"));
        assert!(lines[3].contains("2.5s"));
    }

    #[test]
    fn reads_persisted_log() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(None, Some(dir.path().to_path_buf())).unwrap();
        {
            let store = settings.open_state().unwrap();
            let mut a = DeploymentAttempt::new("svc1", 1, "localhost:5000/svc1:v1", AttemptKind::Deploy);
            store.append_attempt(&mut a).unwrap();
        }

        history(&settings, "svc1", Some(5), true).unwrap();
        history(&settings, "unknown", None, false).unwrap();
    }
}
