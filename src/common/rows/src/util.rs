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

use futures::StreamExt;

use crate::error::Result;
use crate::{Row, SendableRowStream};

/// Drain a stream into memory. Test and small-result helper; the executor
/// itself never collects an unbounded stream.
pub async fn collect(mut stream: SendableRowStream) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        rows.push(row?);
    }
    Ok(rows)
}

/// Drain a stream, ignoring rows, returning the row count.
pub async fn count(mut stream: SendableRowStream) -> Result<usize> {
    let mut n = 0;
    while let Some(row) = stream.next().await {
        row?;
        n += 1;
    }
    Ok(n)
}
