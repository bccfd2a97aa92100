// Wire format: a 12-byte zero-padded command tag followed by a typed payload

use std::io::Read;

use crate::core::{
    read_string, read_u32, read_var_bytes, read_varint, write_string, write_u32, write_var_bytes,
    write_varint, Serializable,
};
use crate::{Error, Result};

/// Command tags are zero-padded ASCII of this length.
pub const COMMAND_LENGTH: usize = 12;
pub const PROTOCOL_VERSION: u32 = 1;

/// What an inventory or get-data message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
    Tx,
}

impl InvKind {
    fn as_byte(self) -> u8 {
        match self {
            InvKind::Block => 1,
            InvKind::Tx => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(InvKind::Block),
            2 => Ok(InvKind::Tx),
            other => Err(Error::Corrupted(format!("unknown inventory kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u32,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPayload {
    pub addr_from: String,
    /// Serialized block.
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub addr_from: String,
    /// Serialized transaction.
    pub transaction: Vec<u8>,
}

impl Serializable for VersionPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_u32(buf, self.version);
        write_u32(buf, self.best_height);
        write_string(buf, &self.addr_from);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            version: read_u32(reader)?,
            best_height: read_u32(reader)?,
            addr_from: read_string(reader)?,
        })
    }
}

impl Serializable for AddrPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.addr_list.len() as u64);
        for addr in &self.addr_list {
            write_string(buf, addr);
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let count = read_varint(reader)? as usize;
        let mut addr_list = Vec::with_capacity(count);
        for _ in 0..count {
            addr_list.push(read_string(reader)?);
        }
        Ok(Self { addr_list })
    }
}

impl Serializable for GetBlocksPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr_from);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            addr_from: read_string(reader)?,
        })
    }
}

impl Serializable for GetDataPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr_from);
        buf.push(self.kind.as_byte());
        write_var_bytes(buf, &self.id);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let addr_from = read_string(reader)?;
        let mut kind = [0u8; 1];
        reader
            .read_exact(&mut kind)
            .map_err(|e| Error::Corrupted(e.to_string()))?;
        Ok(Self {
            addr_from,
            kind: InvKind::from_byte(kind[0])?,
            id: read_var_bytes(reader)?,
        })
    }
}

impl Serializable for InvPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr_from);
        buf.push(self.kind.as_byte());
        write_varint(buf, self.items.len() as u64);
        for item in &self.items {
            write_var_bytes(buf, item);
        }
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let addr_from = read_string(reader)?;
        let mut kind = [0u8; 1];
        reader
            .read_exact(&mut kind)
            .map_err(|e| Error::Corrupted(e.to_string()))?;
        let kind = InvKind::from_byte(kind[0])?;
        let count = read_varint(reader)? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read_var_bytes(reader)?);
        }
        Ok(Self {
            addr_from,
            kind,
            items,
        })
    }
}

impl Serializable for BlockPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr_from);
        write_var_bytes(buf, &self.block);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            addr_from: read_string(reader)?,
            block: read_var_bytes(reader)?,
        })
    }
}

impl Serializable for TxPayload {
    fn write_to(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr_from);
        write_var_bytes(buf, &self.transaction);
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            addr_from: read_string(reader)?,
            transaction: read_var_bytes(reader)?,
        })
    }
}

/// One request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    GetBlocks(GetBlocksPayload),
    GetData(GetDataPayload),
    Inv(InvPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "address",
            Message::GetBlocks(_) => "get-blocks",
            Message::GetData(_) => "get-data",
            Message::Inv(_) => "inventory",
            Message::Block(_) => "block",
            Message::Tx(_) => "transaction",
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&command_bytes(self.command()));
        match self {
            Message::Version(p) => p.write_to(&mut buf),
            Message::Addr(p) => p.write_to(&mut buf),
            Message::GetBlocks(p) => p.write_to(&mut buf),
            Message::GetData(p) => p.write_to(&mut buf),
            Message::Inv(p) => p.write_to(&mut buf),
            Message::Block(p) => p.write_to(&mut buf),
            Message::Tx(p) => p.write_to(&mut buf),
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < COMMAND_LENGTH {
            return Err(Error::Corrupted("request shorter than a command tag".to_string()));
        }
        let command = parse_command(&data[..COMMAND_LENGTH])?;
        let payload = &data[COMMAND_LENGTH..];
        match command.as_str() {
            "version" => Ok(Message::Version(VersionPayload::deserialize(payload)?)),
            "address" => Ok(Message::Addr(AddrPayload::deserialize(payload)?)),
            "get-blocks" => Ok(Message::GetBlocks(GetBlocksPayload::deserialize(payload)?)),
            "get-data" => Ok(Message::GetData(GetDataPayload::deserialize(payload)?)),
            "inventory" => Ok(Message::Inv(InvPayload::deserialize(payload)?)),
            "block" => Ok(Message::Block(BlockPayload::deserialize(payload)?)),
            "transaction" => Ok(Message::Tx(TxPayload::deserialize(payload)?)),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

fn command_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    let len = command.len().min(COMMAND_LENGTH);
    bytes[..len].copy_from_slice(&command.as_bytes()[..len]);
    bytes
}

fn parse_command(bytes: &[u8]) -> Result<String> {
    let trimmed: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8(trimmed).map_err(|e| Error::Corrupted(e.to_string()))
}
