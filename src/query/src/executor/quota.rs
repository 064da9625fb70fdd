// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The shared intermediate-result bound: a running row counter across
/// every federation input. On overflow the streams are truncated, the
/// query still completes with partial data.
#[derive(Debug)]
pub struct RowQuota {
    limit: usize,
    used: AtomicUsize,
    exceeded: AtomicBool,
}

pub type RowQuotaRef = Arc<RowQuota>;

impl RowQuota {
    pub fn new(limit: usize) -> RowQuotaRef {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            exceeded: AtomicBool::new(false),
        })
    }

    /// Charge one row; `false` means the limit is reached and the row
    /// must not be materialized.
    pub fn try_charge(&self) -> bool {
        let previous = self.used.fetch_add(1, Ordering::AcqRel);
        if previous >= self.limit {
            self.exceeded.store(true, Ordering::Release);
            return false;
        }
        true
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_truncates_at_limit() {
        let quota = RowQuota::new(2);
        assert!(quota.try_charge());
        assert!(quota.try_charge());
        assert!(!quota.try_charge());
        assert!(quota.is_exceeded());
    }
}
