// Copyright (C) 2025 the Arbor Authors. This program is free software: you can
// redistribute it and/or modify it under the terms of the GNU General Public
// License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// BINARY values of at least this many bytes are streamed to the blob
    /// store on write and referenced externally; smaller values are encoded
    /// inline in the bundle.
    pub min_blob_size: usize,

    /// When an externally stored blob is missing on read, substitute an empty
    /// binary and log a warning instead of failing the read.
    pub ignore_missing_blobs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            // 4KB
            min_blob_size: 1 << 12,
            ignore_missing_blobs: false,
        }
    }
}
