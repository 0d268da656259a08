mod id;
mod operation;
mod org;
mod severity;
#[cfg(feature = "sqlx-support")]
mod sqlx_support;
mod state;

pub use id::{Id, IdGenerator, RevisionKey};
pub use operation::{Operation, UnknownOperation};
pub use org::{Credential, Member, OrganizationType, Principal, Role};
pub use severity::Severity;
pub use state::{DocumentState, UnknownState};
