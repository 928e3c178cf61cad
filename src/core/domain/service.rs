//! Service entity (§3 Data Model): a named bundle of nodes, M:N with both
//! Admin (grants) and Subscription (selection).

use super::ids::{AdminId, NodeId, ServiceId};

#[derive(Debug, Clone)]
pub struct Service {
    pub id: ServiceId,
    pub remark: String,
    pub node_ids: Vec<NodeId>,
    /// Admins granted this service.
    pub admin_ids: Vec<AdminId>,
}

impl Service {
    #[must_use]
    pub fn grants(&self, admin_id: AdminId) -> bool {
        self.admin_ids.contains(&admin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_grants_checks_admin_membership() {
        let svc = Service {
            id: ServiceId(1),
            remark: "eu".into(),
            node_ids: vec![NodeId(1), NodeId(2)],
            admin_ids: vec![AdminId(5)],
        };
        assert!(svc.grants(AdminId(5)));
        assert!(!svc.grants(AdminId(6)));
    }
}
