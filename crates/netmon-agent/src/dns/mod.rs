// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! DNS resolver activity: log tailing, line parsing, name hashing and
//! per-client correlation.

pub mod correlator;
pub mod hash;
pub mod parse;
pub mod tail;

pub use correlator::Correlator;
pub use hash::QnameHasher;
pub use parse::{parse, Action, ParsedLine};
pub use tail::Tailer;
