//! # DAPI Core
//!
//! Resilient address management and request transports for clients of the Dash
//! decentralized API (DAPI).
//!
//! This crate provides:
//!
//! - **[`address`]**: Node addresses with exponential-backoff ban state, and the
//!   [`AddressPool`](address::AddressPool) that picks a random live one.
//!
//! - **[`masternode`]**: The masternode list model and the
//!   [`MasternodeListTracker`](masternode::MasternodeListTracker), which keeps it current
//!   through a diff subscription.
//!
//! - **[`provider`]**: Address provider strategies (static list, masternode-list driven, or
//!   custom) and the factory that picks one from configuration.
//!
//! - **[`transport`]**: gRPC and JSON-RPC transports sharing one retry contract, and the
//!   error taxonomy both classify failures into.
//!
//! - **[`stream`]**: A reconnecting wrapper around server streams with scheduled rotation
//!   and bounded error retries.
//!
//! - **[`client`]**: [`DapiClient`](client::DapiClient), wiring configuration, provider and
//!   transports together.
//!
//! ## Request Flow
//!
//! ```text
//! Transport call
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ AddressProvider  │ ─── None ──► NoAvailableAddresses
//! │ (list / dynamic) │
//! └────────┬─────────┘
//!          │ live address
//!          ▼
//! ┌──────────────────┐
//! │     Attempt      │ ─── Ok ──► mark live, return
//! └────────┬─────────┘
//!          │ classified failure
//!          ▼
//!   BanPolicy ──► ban address?
//!          │
//!          ▼
//!   retriable? ── no ──► Response error
//!          │ yes
//!          ▼
//!   retries left and live addresses? ── no ──► MaxRetriesReached /
//!          │ yes                                NoAvailableAddressesForRetry
//!          └──► next attempt
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod logging;
pub mod masternode;
pub mod provider;
pub mod stream;
pub mod transport;
pub mod types;

pub use client::{DapiClient, DapiClientBuilder};
pub use transport::{ResponseError, ResponseErrorKind, TransportError};
