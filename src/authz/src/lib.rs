//! # Atrium AuthZ
//!
//! Multi-tenant authorization core: given a principal (a user or a team),
//! decide whether it may perform an action on a resource, honoring
//! organization-level and workspace-level role inheritance and
//! type-specific scoping. Coupled to it is the provisioning state machine
//! that establishes a new account's first organizational context and
//! seeds the role assignments the engine subsequently consults.
//!
//! The crate is consumed in-process: collaborators inject a storage
//! backend (`store::InMemoryStore`, or `store::PostgresStore` behind the
//! `postgres` feature) and talk to the services built on top of it.

pub mod assignments;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod invitations;
pub mod membership;
pub mod provisioning;
pub mod registry;
pub mod store;

pub use assignments::AssignmentService;
pub use enforcement::Enforcer;
pub use engine::{EvaluateRequest, EvaluationEngine};
pub use error::{AuthzError, Result};
pub use invitations::InvitationService;
pub use membership::MembershipValidator;
pub use provisioning::{ProvisionOutcome, ProvisionedContext, Provisioner, ProvisioningState};
pub use registry::{BuiltinRoles, RoleRegistry};
pub use store::{AuthzStore, InMemoryStore};
