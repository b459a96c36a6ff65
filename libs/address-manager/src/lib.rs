// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! # Address Manager
//!
//! Hand out IPv4 addresses from small, per-profile pools and remember who held
//! them.
//!
//! The [allocator::LeaseAllocator] picks an address for a connecting client out
//! of a [pool::Profile] and releases it again on disconnect. Every decision is
//! made inside a single [store::LeaseStore] transaction, so concurrent hook
//! invocations never hand out the same address twice.
//!
//! Leases are never deleted. A released lease keeps its owner and
//! [session::SessionToken], which lets a returning client get its previous
//! address back.

pub mod allocator;
pub mod pool;
pub mod session;
pub mod store;
