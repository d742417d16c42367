// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
use std::io;
use std::path::{Component, Path, PathBuf};

/// The byte-source boundary: maps a logical file name to an owned byte
/// buffer. The decode layer does not know where bytes come from.
pub trait FileLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<Vec<u8>, io::Error>;
}

/// Loads files from a directory root. Logical names are relative paths
/// under the root; absolute names and parent traversal are rejected.
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new<P: Into<PathBuf>>(root: P) -> DirLoader {
        DirLoader { root: root.into() }
    }
}

impl FileLoader for DirLoader {
    fn load(&self, name: &str) -> Result<Vec<u8>, io::Error> {
        let path = Path::new(name);
        let escapes = path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name: {name}"),
            ));
        }
        std::fs::read(self.root.join(path))
    }
}
