// ── Controller list ──
//
// One ordered list keyed by (name, datatype) under the registry mutex.
// Sorted insertion keeps `first_name`/`next_name` cursors deterministic.

use tracing::debug;

use super::{ControllerRegistry, Entry};
use crate::error::{CoreError, CoreResult};
use crate::model::{Alarm, AlarmKind, AuditType, ControllerRecord, ControllerType, DataType};

impl ControllerRegistry {
    /// Register a controller under `datatype` (CANDIDATE or RUNNING).
    pub fn add(&self, record: ControllerRecord, datatype: DataType) -> CoreResult<()> {
        if !matches!(datatype, DataType::Candidate | DataType::Running) {
            return Err(CoreError::NotAllowedForDatatype {
                operation: "controller add".into(),
                datatype,
            });
        }

        let mut list = self.controllers.lock();
        match search(&list, &record.name, datatype) {
            Ok(_) => Err(CoreError::instance_exists(format!(
                "controller {} ({datatype})",
                record.name
            ))),
            Err(pos) => {
                debug!(ctrlr = %record.name, %datatype, "controller added");
                list.insert(pos, Entry { record, datatype });
                Ok(())
            }
        }
    }

    /// Remove a controller record. Clears a pending invalid-config alarm
    /// when the RUNNING record carried one.
    pub fn delete(&self, name: &str, datatype: DataType) -> CoreResult<ControllerRecord> {
        let removed = {
            let mut list = self.controllers.lock();
            let pos = search(&list, name, datatype)
                .map_err(|_| CoreError::no_such_instance(format!("controller {name} ({datatype})")))?;
            list.remove(pos).record
        };

        if datatype == DataType::Running && removed.invalid_config {
            self.alarms
                .raise(Alarm::new(AlarmKind::InvalidConfig, false).for_ctrlr(name));
        }
        debug!(ctrlr = name, %datatype, "controller deleted");
        Ok(removed)
    }

    pub fn update_version(&self, name: &str, datatype: DataType, version: &str) -> CoreResult<()> {
        self.modify(name, datatype, |rec| version.clone_into(&mut rec.version))
    }

    pub fn update_audit_type(
        &self,
        name: &str,
        datatype: DataType,
        audit_type: AuditType,
    ) -> CoreResult<()> {
        self.modify(name, datatype, |rec| rec.audit_type = audit_type)
    }

    pub fn update_enable_audit(&self, name: &str, datatype: DataType, enable: bool) -> CoreResult<()> {
        self.modify(name, datatype, |rec| rec.enable_audit = enable)
    }

    pub fn update_audit_done(&self, name: &str, done: bool) -> CoreResult<()> {
        self.modify(name, DataType::Running, |rec| rec.audit_done = done)
    }

    pub fn update_config_done(&self, name: &str, done: bool) -> CoreResult<()> {
        self.modify(name, DataType::Running, |rec| rec.config_done = done)
    }

    /// Set the RUNNING record's invalid-config flag. Returns the previous
    /// value so callers can drive alarm edges.
    pub fn update_invalid_config(&self, name: &str, invalid: bool) -> CoreResult<bool> {
        let mut previous = false;
        self.modify(name, DataType::Running, |rec| {
            previous = rec.invalid_config;
            rec.invalid_config = invalid;
        })?;
        Ok(previous)
    }

    // ── Lookups (canonicalized datatype) ─────────────────────────────

    pub fn get_record(&self, name: &str, datatype: DataType) -> CoreResult<ControllerRecord> {
        self.read(name, datatype.canonical(), Clone::clone)
    }

    pub fn get_type(&self, name: &str, datatype: DataType) -> CoreResult<ControllerType> {
        self.read(name, datatype.canonical(), |rec| rec.ctrlr_type)
    }

    pub fn get_type_and_version(
        &self,
        name: &str,
        datatype: DataType,
    ) -> CoreResult<(ControllerType, String)> {
        self.read(name, datatype.canonical(), |rec| {
            (rec.ctrlr_type, rec.version.clone())
        })
    }

    pub fn is_config_invalid(&self, name: &str, datatype: DataType) -> CoreResult<bool> {
        self.read(name, datatype.canonical(), |rec| rec.invalid_config)
    }

    pub fn is_config_done(&self, name: &str, datatype: DataType) -> CoreResult<bool> {
        self.read(name, datatype.canonical(), |rec| rec.config_done)
    }

    pub fn is_audit_done(&self, name: &str, datatype: DataType) -> CoreResult<bool> {
        self.read(name, datatype.canonical(), |rec| rec.audit_done)
    }

    pub fn get_audit_type(&self, name: &str, datatype: DataType) -> CoreResult<AuditType> {
        self.read(name, datatype.canonical(), |rec| rec.audit_type)
    }

    pub fn contains(&self, name: &str, datatype: DataType) -> bool {
        search(&self.controllers.lock(), name, datatype.canonical()).is_ok()
    }

    // ── Cursor iteration ─────────────────────────────────────────────

    /// Smallest controller name registered under `datatype`.
    pub fn first_name(&self, datatype: DataType) -> CoreResult<String> {
        self.controllers
            .lock()
            .iter()
            .find(|e| e.datatype == datatype)
            .map(|e| e.record.name.clone())
            .ok_or_else(|| CoreError::no_such_instance(format!("controllers ({datatype})")))
    }

    /// Next controller name strictly after `after` under `datatype`.
    pub fn next_name(&self, datatype: DataType, after: &str) -> CoreResult<String> {
        self.controllers
            .lock()
            .iter()
            .find(|e| e.datatype == datatype && e.record.name.as_str() > after)
            .map(|e| e.record.name.clone())
            .ok_or_else(|| CoreError::no_such_instance(format!("controller after {after} ({datatype})")))
    }

    /// All names registered under `datatype`, in order.
    pub fn names(&self, datatype: DataType) -> Vec<String> {
        self.controllers
            .lock()
            .iter()
            .filter(|e| e.datatype == datatype)
            .map(|e| e.record.name.clone())
            .collect()
    }

    /// RUNNING controllers currently flagged invalid-configuration.
    pub fn invalid_config_controllers(&self) -> Vec<String> {
        self.controllers
            .lock()
            .iter()
            .filter(|e| e.datatype == DataType::Running && e.record.invalid_config)
            .map(|e| e.record.name.clone())
            .collect()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.lock().len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn modify(
        &self,
        name: &str,
        datatype: DataType,
        f: impl FnOnce(&mut ControllerRecord),
    ) -> CoreResult<()> {
        let mut list = self.controllers.lock();
        let pos = search(&list, name, datatype)
            .map_err(|_| CoreError::no_such_instance(format!("controller {name} ({datatype})")))?;
        if let Some(entry) = list.get_mut(pos) {
            f(&mut entry.record);
        }
        Ok(())
    }

    fn read<T>(
        &self,
        name: &str,
        datatype: DataType,
        f: impl FnOnce(&ControllerRecord) -> T,
    ) -> CoreResult<T> {
        let list = self.controllers.lock();
        search(&list, name, datatype)
            .ok()
            .and_then(|pos| list.get(pos))
            .map(|e| f(&e.record))
            .ok_or_else(|| CoreError::no_such_instance(format!("controller {name} ({datatype})")))
    }
}

fn search(list: &[Entry], name: &str, datatype: DataType) -> Result<usize, usize> {
    list.binary_search_by(|e| (e.record.name.as_str(), e.datatype).cmp(&(name, datatype)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alarm::RecordingAlarmSink;
    use crate::error::ErrorKind;

    fn registry() -> (ControllerRegistry, Arc<RecordingAlarmSink>) {
        let sink = Arc::new(RecordingAlarmSink::new());
        (ControllerRegistry::new(sink.clone()), sink)
    }

    fn pfc(name: &str) -> ControllerRecord {
        ControllerRecord::new(name, ControllerType::Pfc, "5.0")
    }

    #[test]
    fn duplicate_add_fails_without_mutation() {
        let (reg, _) = registry();
        reg.add(pfc("pfc1"), DataType::Candidate).unwrap();

        let mut changed = pfc("pfc1");
        changed.version = "6.0".into();
        let err = reg.add(changed, DataType::Candidate).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceExists);
        assert_eq!(reg.controller_count(), 1);
        assert_eq!(
            reg.get_type_and_version("pfc1", DataType::Candidate).unwrap().1,
            "5.0"
        );

        reg.add(pfc("pfc1"), DataType::Running).unwrap();
        assert_eq!(reg.controller_count(), 2);
    }

    #[test]
    fn add_rejects_views_without_records() {
        let (reg, _) = registry();
        for dt in [DataType::State, DataType::Startup, DataType::Import, DataType::Audit] {
            assert_eq!(
                reg.add(pfc("pfc1"), dt).unwrap_err().kind(),
                ErrorKind::NotAllowedForDatatype
            );
        }
    }

    #[test]
    fn cursor_yields_sorted_names_per_datatype() {
        let (reg, _) = registry();
        for name in ["pfc3", "pfc1", "vnp2", "odc0"] {
            reg.add(pfc(name), DataType::Running).unwrap();
        }
        reg.add(pfc("aaa"), DataType::Candidate).unwrap();
        reg.delete("pfc3", DataType::Running).unwrap();

        let mut names = vec![reg.first_name(DataType::Running).unwrap()];
        while let Ok(next) = reg.next_name(DataType::Running, names.last().unwrap()) {
            names.push(next);
        }
        assert_eq!(names, ["odc0", "pfc1", "vnp2"]);
        assert_eq!(
            reg.next_name(DataType::Running, "vnp2").unwrap_err().kind(),
            ErrorKind::NoSuchInstance
        );
        assert_eq!(reg.first_name(DataType::Candidate).unwrap(), "aaa");
        assert!(reg.first_name(DataType::Startup).is_err());
    }

    #[test]
    fn delete_running_with_invalid_config_clears_alarm_once() {
        let (reg, sink) = registry();
        reg.add(pfc("pfc1"), DataType::Candidate).unwrap();
        reg.add(pfc("pfc1"), DataType::Running).unwrap();
        reg.update_invalid_config("pfc1", true).unwrap();

        reg.delete("pfc1", DataType::Running).unwrap();

        assert_eq!(
            sink.transitions(AlarmKind::InvalidConfig),
            vec![(false, Some("pfc1".to_owned()))]
        );
        assert!(reg.contains("pfc1", DataType::Candidate));
        assert_eq!(
            reg.get_type("pfc1", DataType::Running).unwrap_err().kind(),
            ErrorKind::NoSuchInstance
        );
    }

    #[test]
    fn delete_candidate_never_touches_alarms() {
        let (reg, sink) = registry();
        let mut rec = pfc("pfc1");
        rec.invalid_config = true;
        reg.add(rec, DataType::Candidate).unwrap();
        reg.delete("pfc1", DataType::Candidate).unwrap();
        assert!(sink.alarms().is_empty());
        assert_eq!(
            reg.delete("pfc1", DataType::Candidate).unwrap_err().kind(),
            ErrorKind::NoSuchInstance
        );
    }

    #[test]
    fn lookups_canonicalize_datatype() {
        let (reg, _) = registry();
        reg.add(ControllerRecord::new("vnp1", ControllerType::Vnp, "1.2"), DataType::Running)
            .unwrap();
        assert_eq!(reg.get_type("vnp1", DataType::State).unwrap(), ControllerType::Vnp);
        assert_eq!(reg.get_type("vnp1", DataType::Audit).unwrap(), ControllerType::Vnp);
        assert!(reg.get_type("vnp1", DataType::Import).is_err());
    }

    #[test]
    fn flag_updates_are_running_only() {
        let (reg, _) = registry();
        reg.add(pfc("pfc1"), DataType::Candidate).unwrap();
        assert!(reg.update_audit_done("pfc1", true).is_err());

        reg.add(pfc("pfc1"), DataType::Running).unwrap();
        reg.update_audit_done("pfc1", true).unwrap();
        reg.update_config_done("pfc1", true).unwrap();
        assert!(reg.is_audit_done("pfc1", DataType::State).unwrap());
        assert!(reg.is_config_done("pfc1", DataType::Running).unwrap());
        assert!(!reg.update_invalid_config("pfc1", true).unwrap());
        assert!(reg.update_invalid_config("pfc1", true).unwrap());
        assert_eq!(reg.invalid_config_controllers(), ["pfc1"]);
    }

    #[test]
    fn version_and_audit_type_updates() {
        let (reg, _) = registry();
        reg.add(pfc("pfc1"), DataType::Candidate).unwrap();
        reg.update_version("pfc1", DataType::Candidate, "7.1").unwrap();
        reg.update_audit_type("pfc1", DataType::Candidate, AuditType::Simplified)
            .unwrap();
        assert_eq!(
            reg.get_type_and_version("pfc1", DataType::Import).unwrap(),
            (ControllerType::Pfc, "7.1".to_owned())
        );
        assert_eq!(
            reg.get_audit_type("pfc1", DataType::Candidate).unwrap(),
            AuditType::Simplified
        );
        assert!(reg.update_version("pfc1", DataType::Running, "7.1").is_err());
    }
}
