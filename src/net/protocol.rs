use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted key field. Keys are user strings; anything bigger is a
/// malformed or hostile frame.
pub const MAX_KEY_LEN: usize = 64 * 1024;
/// Largest accepted value field.
pub const MAX_VALUE_LEN: usize = 64 * 1024 * 1024;

/// Request opcodes. `0x0x` carries client data traffic, `0x1x` carries
/// overlay maintenance and replica traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Get = 0x01,
    Put = 0x02,
    Delete = 0x03,
    Join = 0x10,
    Stabilize = 0x11,
    Notify = 0x12,
    Ping = 0x13,
    /// Replica put: applied directly to local storage, bypassing the
    /// ownership check that would otherwise redirect it.
    Replicate = 0x14,
    FindSuccessor = 0x15,
    GetPredecessor = 0x16,
    GetSuccessor = 0x17,
    NodeInfo = 0x18,
    /// Replica delete, same bypass as [`OpCode::Replicate`].
    ReplicateDelete = 0x19,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(OpCode::Get),
            0x02 => Some(OpCode::Put),
            0x03 => Some(OpCode::Delete),
            0x10 => Some(OpCode::Join),
            0x11 => Some(OpCode::Stabilize),
            0x12 => Some(OpCode::Notify),
            0x13 => Some(OpCode::Ping),
            0x14 => Some(OpCode::Replicate),
            0x15 => Some(OpCode::FindSuccessor),
            0x16 => Some(OpCode::GetPredecessor),
            0x17 => Some(OpCode::GetSuccessor),
            0x18 => Some(OpCode::NodeInfo),
            0x19 => Some(OpCode::ReplicateDelete),
            _ => None,
        }
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    KeyNotFound = 0x01,
    Error = 0x02,
    /// The receiver does not own the key; the value field carries the
    /// responsible node's `"host:port"` for the client to retry against.
    Redirect = 0x03,
}

impl Status {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::Success),
            0x01 => Some(Status::KeyNotFound),
            0x02 => Some(Status::Error),
            0x03 => Some(Status::Redirect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: OpCode,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Request {
    pub fn new(opcode: OpCode, key: Vec<u8>, value: Vec<u8>) -> Self {
        Request { opcode, key, value }
    }

    /// Overlay request with no key, payload in the value field.
    pub fn control(opcode: OpCode, value: Vec<u8>) -> Self {
        Request::new(opcode, Vec::new(), value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub value: Vec<u8>,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            status: Status::Success,
            value: Vec::new(),
        }
    }

    pub fn success(value: Vec<u8>) -> Self {
        Response {
            status: Status::Success,
            value,
        }
    }

    pub fn not_found() -> Self {
        Response {
            status: Status::KeyNotFound,
            value: Vec::new(),
        }
    }

    pub fn error() -> Self {
        Response {
            status: Status::Error,
            value: Vec::new(),
        }
    }

    pub fn redirect(endpoint: &str) -> Self {
        Response {
            status: Status::Redirect,
            value: endpoint.as_bytes().to_vec(),
        }
    }
}

/// Frame-level failures. I/O errors pass through; everything else means the
/// peer sent bytes that do not form a valid frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown opcode {0:#04x}")]
    UnknownOpCode(u8),
    #[error("unknown status {0:#04x}")]
    UnknownStatus(u8),
    #[error("key length {0} exceeds the {MAX_KEY_LEN} byte limit")]
    KeyTooLarge(usize),
    #[error("value length {0} exceeds the {MAX_VALUE_LEN} byte limit")]
    ValueTooLarge(usize),
}

async fn read_field<R>(reader: &mut R, limit: usize, oversize: fn(usize) -> ProtocolError) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > limit {
        return Err(oversize(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reads one request frame. `Ok(None)` is a clean end of stream: the peer
/// closed the connection before sending another opcode byte.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut opcode_byte = [0u8; 1];
    match reader.read_exact(&mut opcode_byte).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let opcode =
        OpCode::from_u8(opcode_byte[0]).ok_or(ProtocolError::UnknownOpCode(opcode_byte[0]))?;
    let key = read_field(reader, MAX_KEY_LEN, ProtocolError::KeyTooLarge).await?;
    let value = read_field(reader, MAX_VALUE_LEN, ProtocolError::ValueTooLarge).await?;

    Ok(Some(Request { opcode, key, value }))
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(9 + request.key.len() + request.value.len());
    frame.push(request.opcode as u8);
    frame.extend_from_slice(&(request.key.len() as u32).to_be_bytes());
    frame.extend_from_slice(&request.key);
    frame.extend_from_slice(&(request.value.len() as u32).to_be_bytes());
    frame.extend_from_slice(&request.value);

    writer.write_all(&frame).await?;
    writer.flush().await
}

pub async fn read_response<R>(reader: &mut R) -> Result<Response, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let status_byte = reader.read_u8().await?;
    let status = Status::from_u8(status_byte).ok_or(ProtocolError::UnknownStatus(status_byte))?;
    let value = read_field(reader, MAX_VALUE_LEN, ProtocolError::ValueTooLarge).await?;

    Ok(Response { status, value })
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(5 + response.value.len());
    frame.push(response.status as u8);
    frame.extend_from_slice(&(response.value.len() as u32).to_be_bytes());
    frame.extend_from_slice(&response.value);

    writer.write_all(&frame).await?;
    writer.flush().await
}
