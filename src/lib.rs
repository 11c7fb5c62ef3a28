// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

mod blinder;
mod builder;
mod disclosure;
mod error;
mod hasher;
mod jwt;
mod key_binding_jwt;
mod presentation;
mod rehydrator;
mod sd_jwt;
mod signer;
mod status_list;
mod utils;
mod validator;

pub use blinder::*;
pub use builder::*;
pub use disclosure::*;
pub use error::*;
pub use hasher::*;
pub use key_binding_jwt::*;
pub use presentation::*;
pub use rehydrator::*;
pub use sd_jwt::*;
pub use signer::*;
pub use status_list::*;
pub use validator::*;
pub(crate) use utils::*;
