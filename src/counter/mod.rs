// Copyright 2025 metrika
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Counter primitives: keys, cells, registries, and scope traces.

pub mod cell;
pub mod key;
pub mod registry;
pub mod trace;

pub use cell::CounterCell;
pub use key::{CounterKey, KeyError};
pub use registry::{CounterOp, CounterRegistry};
pub use trace::Trace;
