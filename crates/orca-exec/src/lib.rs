//! orca-exec: dispatch of provisioning operations to infrastructure
//! executors.
//!
//! Each supported infrastructure provides an [`OperationExecutor`]. The
//! [`ExecutorRegistry`] maps infrastructure names to constructors, builds an
//! executor the first time it is needed and reuses it afterwards.
//!
//! ```text
//! ExecutorRegistry::execute("kubernetes", ctx, op)
//!     └─► KubernetesExecutor::exec_operation
//!             ├─ resolve KubernetesConfig   (fails before any network call)
//!             ├─ skip if the task is CANCELED
//!             └─ ClusterApi::submit(OperationRequest)
//! ```

pub mod error;
pub mod executor;
pub mod kubeconfig;
pub mod kubernetes;
pub mod operation;
pub mod registry;
pub mod tls;

pub use error::{ExecError, ExecResult};
pub use executor::{BoxFuture, ExecContext, OperationExecutor};
pub use kubernetes::{
    ClusterApi, ClusterConnector, HttpClusterApi, KubernetesConfig, KubernetesExecutor,
    OperationRequest,
};
pub use operation::Operation;
pub use registry::{ExecutorConstructor, ExecutorRegistry};
pub use tls::{PemSource, TlsSettings};
