// SPDX-License-Identifier: MIT

pub mod broadcaster;
pub mod coordinator;
pub mod prover;
pub mod provider;
