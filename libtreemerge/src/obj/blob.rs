use super::{ObjType, Serialize, WritableObject};
use crate::error::MergeResult;
use std::io::Write;

#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct Blob {
    bytes: Vec<u8>,
}

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Serialize for Blob {
    fn serialize(&self, writer: &mut dyn Write) -> MergeResult<()> {
        writer.write_all(&self.bytes)?;
        Ok(())
    }
}

impl WritableObject for Blob {
    fn obj_ty(&self) -> ObjType {
        ObjType::Blob
    }
}
