// =============================================================================
// Decision Envelope — Auditable record of every deploy/no-deploy decision
// =============================================================================
//
// Every candidate pool flows through telemetry validation, the entry gate,
// and risk sizing. The envelope captures the verdict from each layer so
// every decision can be audited after the fact, with the gate's closed
// reason codes preserved verbatim.
// =============================================================================

use serde::Serialize;

/// Complete auditable record of a deployment decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    /// Pool the decision pertains to.
    pub pool: String,

    /// "DEPLOY", "SKIP", or "EXIT".
    pub action: String,

    /// Composite score at decision time (bootstrap or telemetry).
    pub score: f64,

    /// Whether the score was bootstrap-derived (never mixed silently).
    pub is_bootstrap: bool,

    /// Telemetry layer verdict ("PASS" / "FAIL").
    pub telemetry_verdict: String,

    /// Entry gate verdict ("PASS" / "FAIL").
    pub gate_verdict: String,

    /// Risk sizing verdict ("PASS" / "FAIL").
    pub risk_verdict: String,

    /// Final decision: "ALLOW" or "BLOCK".
    pub final_decision: String,

    /// Which layer blocked the deployment (if blocked).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_layer: Option<String>,

    /// Stable reason code or human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// ISO 8601 timestamp of when this decision was created.
    pub created_at: String,
}

impl DecisionEnvelope {
    /// Create an envelope that allows the deployment.
    pub fn allow(pool: impl Into<String>, score: f64, is_bootstrap: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pool: pool.into(),
            action: "DEPLOY".to_string(),
            score,
            is_bootstrap,
            telemetry_verdict: "PASS".to_string(),
            gate_verdict: "PASS".to_string(),
            risk_verdict: "PASS".to_string(),
            final_decision: "ALLOW".to_string(),
            blocking_layer: None,
            reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a blocked decision attributed to one layer.
    pub fn blocked(
        pool: impl Into<String>,
        score: f64,
        is_bootstrap: bool,
        blocking_layer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let layer = blocking_layer.into();
        let mut envelope = Self::allow(pool, score, is_bootstrap);
        envelope.action = "SKIP".to_string();
        envelope.final_decision = "BLOCK".to_string();
        match layer.as_str() {
            "Telemetry" => envelope.telemetry_verdict = "FAIL".to_string(),
            "Gate" => envelope.gate_verdict = "FAIL".to_string(),
            "Risk" => envelope.risk_verdict = "FAIL".to_string(),
            _ => {}
        }
        envelope.blocking_layer = Some(layer);
        envelope.reason = Some(reason.into());
        envelope
    }

    /// Create an exit record for an open position.
    pub fn exit(pool: impl Into<String>, score: f64, reason: impl Into<String>) -> Self {
        let mut envelope = Self::allow(pool, score, false);
        envelope.action = "EXIT".to_string();
        envelope.reason = Some(reason.into());
        envelope
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_envelope() {
        let e = DecisionEnvelope::allow("pool-a", 48.5, false);
        assert_eq!(e.action, "DEPLOY");
        assert_eq!(e.final_decision, "ALLOW");
        assert!(e.blocking_layer.is_none());
        assert!(!e.is_bootstrap);
    }

    #[test]
    fn test_blocked_envelope_marks_layer() {
        let e = DecisionEnvelope::blocked("pool-a", 12.0, true, "Gate", "SCORE_LOW");
        assert_eq!(e.final_decision, "BLOCK");
        assert_eq!(e.gate_verdict, "FAIL");
        assert_eq!(e.telemetry_verdict, "PASS");
        assert_eq!(e.blocking_layer.as_deref(), Some("Gate"));
        assert_eq!(e.reason.as_deref(), Some("SCORE_LOW"));
        assert!(e.is_bootstrap);
    }

    #[test]
    fn test_exit_envelope() {
        let e = DecisionEnvelope::exit("pool-a", 15.0, "HARMONIC_FULL_EXIT");
        assert_eq!(e.action, "EXIT");
        assert_eq!(e.reason.as_deref(), Some("HARMONIC_FULL_EXIT"));
    }
}
