// ── Response timeouts ──

use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::model::{ConfigRequest, ControlOp, DataType, Operation};

/// How long a session should wait for the answer to a request.
///
/// `None` means the session must wait indefinitely: candidate edits,
/// import/merge and controller pings can legitimately take as long as
/// the controller needs.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn for_request(&self, req: &ConfigRequest) -> Option<Duration> {
        match req.operation {
            Operation::Control(ControlOp::Ping) => return None,
            Operation::Create | Operation::Update | Operation::Delete if req.datatype == DataType::Candidate => {
                return None;
            }
            _ => {}
        }
        if let Some(timeout) = self.config.key_types.get(&req.ckv.key_type) {
            return Some(*timeout);
        }
        if req.datatype == DataType::State && req.operation.is_read() {
            return Some(self.config.state_read);
        }
        Some(self.config.default)
    }

    /// Import and merge run unbounded.
    pub fn for_import(&self) -> Option<Duration> {
        None
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigKey, ConfigKeyVal, ConfigMode, KeyType, SessionId};

    fn request(op: Operation, dt: DataType, kt: KeyType) -> ConfigRequest {
        let ckv = ConfigKeyVal::new(kt, ConfigKey::from_parts(["vtn1"]));
        ConfigRequest::new(SessionId(1), ConfigMode::Global, op, dt, ckv)
    }

    fn policy() -> TimeoutPolicy {
        let mut config = TimeoutConfig::default();
        config.key_types.insert(KeyType::Vbridge, Duration::from_secs(300));
        TimeoutPolicy::new(config)
    }

    #[test]
    fn candidate_edits_and_pings_are_unbounded() {
        let policy = policy();
        assert_eq!(policy.for_request(&request(Operation::Create, DataType::Candidate, KeyType::Vtn)), None);
        let ping = Operation::Control(ControlOp::Ping);
        assert_eq!(policy.for_request(&request(ping, DataType::State, KeyType::Vtn)), None);
        assert_eq!(policy.for_import(), None);
    }

    #[test]
    fn state_reads_get_the_extended_timeout() {
        let policy = policy();
        let got = policy.for_request(&request(Operation::Read, DataType::State, KeyType::Vtn));
        assert_eq!(got, Some(Duration::from_secs(60)));
        let got = policy.for_request(&request(Operation::Read, DataType::Running, KeyType::Vtn));
        assert_eq!(got, Some(policy.default_timeout()));
    }

    #[test]
    fn key_type_override_wins() {
        let policy = policy();
        let got = policy.for_request(&request(Operation::ReadBulk, DataType::State, KeyType::Vbridge));
        assert_eq!(got, Some(Duration::from_secs(300)));
    }
}
