//! Capability resolution consumed by the ledger.
//!
//! The ledger never inspects groups or permission rows. It asks an
//! [`AccessGate`] once per request for the caller's [`CapabilitySet`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use caja_common::{EmployeeId, RegisterId, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A section of the back office an employee may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Sales,
    Products,
    Customers,
    Purchases,
    Suppliers,
    Batches,
    Brands,
    Reports,
    /// View and record cash-register movements.
    CashMovements,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::Sales,
        Capability::Products,
        Capability::Customers,
        Capability::Purchases,
        Capability::Suppliers,
        Capability::Batches,
        Capability::Brands,
        Capability::Reports,
        Capability::CashMovements,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Sales => "SALES",
            Capability::Products => "PRODUCTS",
            Capability::Customers => "CUSTOMERS",
            Capability::Purchases => "PURCHASES",
            Capability::Suppliers => "SUPPLIERS",
            Capability::Batches => "BATCHES",
            Capability::Brands => "BRANDS",
            Capability::Reports => "REPORTS",
            Capability::CashMovements => "CASH_MOVEMENTS",
        };
        f.write_str(name)
    }
}

/// Capabilities held by a caller for one register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every capability (managers).
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    /// What a new employee gets: sales only.
    pub fn employee_default() -> Self {
        Self::empty().with(Capability::Sales)
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Authorization collaborator.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Resolve what `employee` may do on `register`.
    async fn resolve_capabilities(
        &self,
        employee: &EmployeeId,
        register: &RegisterId,
    ) -> Result<CapabilitySet>;

    /// Whether `employee` may record, reverse and close on `register`.
    async fn can_record_movements(
        &self,
        employee: &EmployeeId,
        register: &RegisterId,
    ) -> Result<bool> {
        Ok(self
            .resolve_capabilities(employee, register)
            .await?
            .contains(Capability::CashMovements))
    }
}

/// Role of an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Gerente: every capability on every register.
    Manager,
    /// Empleado: explicit grants only.
    Employee,
}

#[derive(Debug, Clone)]
struct Grant {
    role: Role,
    capabilities: CapabilitySet,
    /// `None` means every register.
    registers: Option<HashSet<RegisterId>>,
}

/// In-process gate backed by a grant table.
///
/// Unknown employees resolve to an empty set.
#[derive(Debug, Default)]
pub struct StaticAccessGate {
    grants: RwLock<HashMap<EmployeeId, Grant>>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager.
    pub fn grant_manager(&self, employee: EmployeeId) {
        self.grants.write().insert(
            employee,
            Grant {
                role: Role::Manager,
                capabilities: CapabilitySet::all(),
                registers: None,
            },
        );
    }

    /// Register an employee with explicit capabilities, optionally limited to
    /// some registers.
    pub fn grant_employee(
        &self,
        employee: EmployeeId,
        capabilities: CapabilitySet,
        registers: Option<Vec<RegisterId>>,
    ) {
        self.grants.write().insert(
            employee,
            Grant {
                role: Role::Employee,
                capabilities,
                registers: registers.map(|r| r.into_iter().collect()),
            },
        );
    }

    pub fn revoke(&self, employee: &EmployeeId) {
        self.grants.write().remove(employee);
    }

    pub fn role(&self, employee: &EmployeeId) -> Option<Role> {
        self.grants.read().get(employee).map(|g| g.role)
    }
}

#[async_trait]
impl AccessGate for StaticAccessGate {
    async fn resolve_capabilities(
        &self,
        employee: &EmployeeId,
        register: &RegisterId,
    ) -> Result<CapabilitySet> {
        let grants = self.grants.read();
        let Some(grant) = grants.get(employee) else {
            return Ok(CapabilitySet::empty());
        };

        let allowed_here = grant
            .registers
            .as_ref()
            .map_or(true, |registers| registers.contains(register));

        Ok(if allowed_here {
            grant.capabilities.clone()
        } else {
            CapabilitySet::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caja(id: &str) -> RegisterId {
        RegisterId::new(id)
    }

    #[tokio::test]
    async fn test_manager_has_everything() {
        let gate = StaticAccessGate::new();
        gate.grant_manager(EmployeeId::new("gerente"));

        let caps = gate
            .resolve_capabilities(&EmployeeId::new("gerente"), &caja("CAJA_01"))
            .await
            .unwrap();
        assert_eq!(caps, CapabilitySet::all());
        assert_eq!(gate.role(&EmployeeId::new("gerente")), Some(Role::Manager));
    }

    #[tokio::test]
    async fn test_default_employee_cannot_record() {
        let gate = StaticAccessGate::new();
        gate.grant_employee(EmployeeId::new("ana"), CapabilitySet::employee_default(), None);

        assert!(!gate
            .can_record_movements(&EmployeeId::new("ana"), &caja("CAJA_01"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_register_restriction() {
        let gate = StaticAccessGate::new();
        gate.grant_employee(
            EmployeeId::new("ana"),
            CapabilitySet::employee_default().with(Capability::CashMovements),
            Some(vec![caja("CAJA_01")]),
        );

        let ana = EmployeeId::new("ana");
        assert!(gate.can_record_movements(&ana, &caja("CAJA_01")).await.unwrap());
        assert!(!gate.can_record_movements(&ana, &caja("CAJA_02")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_revoked() {
        let gate = StaticAccessGate::new();
        let bob = EmployeeId::new("bob");
        assert!(gate
            .resolve_capabilities(&bob, &caja("CAJA_01"))
            .await
            .unwrap()
            .is_empty());

        gate.grant_manager(bob.clone());
        gate.revoke(&bob);
        assert!(!gate.can_record_movements(&bob, &caja("CAJA_01")).await.unwrap());
    }
}
