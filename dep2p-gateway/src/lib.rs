// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Realm gateway relay for the dep2p realm network.
//!
//! A [`Gateway`] forwards streams between two peers of its realm that
//! cannot dial each other directly: requests pass the protocol gate and the
//! [`RealmAuthenticator`] before a pooled outbound stream is paired with the
//! inbound one and copied bidirectionally under the token-bucket
//! [`BandwidthLimiter`].

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod pool;
pub mod relay;
pub mod validator;

pub use auth::RealmAuthenticator;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayConfig, GatewayRouteAdapter, GatewayState, RelayRequest};
pub use limiter::{BandwidthLimiter, BandwidthToken};
pub use pool::ConnectionPool;
pub use relay::{RelayService, RelaySession};
pub use validator::{validate_protocol, ProtocolValidator};
