//
// Copyright (c) The Proxima Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod error;
pub mod events;
pub mod flood;
pub mod instance;
pub mod interface;
pub mod leader;
pub mod lsdb;
pub mod neighbor;
pub mod output;
pub mod packet;
pub mod route;
pub mod snapshot;
pub mod southbound;
pub mod spf;
pub mod tasks;
