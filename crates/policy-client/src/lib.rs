//! Policy API Client
//!
//! Typed access to `Policy` objects on one cluster. The spec sync controller
//! holds two of these, one for the hub and one for the managed cluster.
//!
//! # Example
//!
//! ```no_run
//! use crds::PolicyRef;
//! use policy_client::{KubePolicyClient, PolicyClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubePolicyClient::new(kube::Client::try_default().await?, "hub");
//! if let Some(policy) = client.get_opt(&PolicyRef::new("ns1", "p1")).await? {
//!     println!("resourceVersion {:?}", policy.metadata.resource_version);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Error classification**: every failure maps to `NotFound`, `Transient`
//!   or `Fatal` (see [`ErrorClass`])
//! - **Optimistic concurrency**: `update` is a resourceVersion-checked replace
//! - **Mocking**: `MockPolicyClient` behind the `test-util` feature

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod policy_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubePolicyClient;
pub use error::{ErrorClass, PolicyClientError};
pub use policy_trait::PolicyClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{CallLog, MockCall, MockOp, MockPolicyClient};
