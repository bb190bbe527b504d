//! Generic halo exchange for distributed structured-grid simulations.
//!
//! Processes own box-shaped subdomains of a global grid; each subdomain
//! carries a thin halo mirroring values owned by its neighbors. This
//! crate computes, once, which bytes every process must exchange with
//! every other ([`pattern::make_pattern`]) and then moves those bytes
//! every time step with as little bookkeeping as possible
//! ([`exchange::CommunicationObject`]).
//!
//! The flow end to end:
//!
//! 1. Describe the local domains ([`domain::CartesianDomain`]) and how
//!    wide their halos are ([`domain::CartesianHaloGenerator`]).
//! 2. Run [`pattern::make_pattern`] collectively over a
//!    [`transport::SetupTransport`]; every rank gets one
//!    [`pattern::Pattern`] per local domain.
//! 3. Wrap each pattern in an [`exchange::CommunicationObject`] and call
//!    `exchange` with the fields after each step; `wait` on the returned
//!    handle fills the halos.
//!
//! Two transports ship: [`transport::mem`], an in-process fabric where
//! ranks are threads (the default test substrate), and an MPI backend
//! behind the `distributed` feature flag.

pub mod allocator;
pub mod buffer;
pub mod callback;
pub mod communicator;
pub mod coords;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod field;
pub mod future;
pub mod pattern;
pub mod transport;
pub mod wire;

pub use error::{HalogenError, Result};
