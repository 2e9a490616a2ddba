// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::store::HealthDataStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<HealthDataStore>,
}

impl AppState {
    pub fn new(store: Arc<HealthDataStore>) -> Self {
        Self { store }
    }
}
