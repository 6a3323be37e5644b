//! Contract interface descriptor and call/log codec.
//!
//! Parses the standard JSON ABI of the consent contract and encodes call data
//! / decodes return data and event logs using the head/tail layout.
//!
//! Supported parameter types: `address`, `bool`, `string`, `bytes`, `bytesN`,
//! `uintN`, `intN` and dynamic arrays `T[]`. Entries using anything else
//! (tuples, fixed-size arrays) are skipped when the descriptor is loaded.

use std::collections::HashMap;
use std::fmt;

use primitive_types::U256;
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use shared_types::Identity;
use thiserror::Error;

/// Size of one ABI word.
const WORD: usize = 32;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("Unsupported parameter type: {0}")]
    UnsupportedType(String),

    #[error("Invalid interface descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Argument of kind {token} does not match parameter type {expected}")]
    TypeMismatch { expected: String, token: String },

    #[error("Data truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Keccak-256 digest.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

// =============================================================================
// TYPES AND VALUES
// =============================================================================

/// Declared type of a function or event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Bool,
    String,
    Bytes,
    FixedBytes(usize),
    Uint(usize),
    Int(usize),
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn parse(raw: &str) -> Result<Self, AbiError> {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }
        let unsupported = || AbiError::UnsupportedType(raw.to_string());
        match raw {
            "address" => Ok(Self::Address),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "bytes" => Ok(Self::Bytes),
            "uint" => Ok(Self::Uint(256)),
            "int" => Ok(Self::Int(256)),
            _ => {
                if let Some(bits) = raw.strip_prefix("uint") {
                    let bits: usize = bits.parse().map_err(|_| unsupported())?;
                    if bits == 0 || bits > 256 || bits % 8 != 0 {
                        return Err(unsupported());
                    }
                    Ok(Self::Uint(bits))
                } else if let Some(bits) = raw.strip_prefix("int") {
                    let bits: usize = bits.parse().map_err(|_| unsupported())?;
                    if bits == 0 || bits > 256 || bits % 8 != 0 {
                        return Err(unsupported());
                    }
                    Ok(Self::Int(bits))
                } else if let Some(len) = raw.strip_prefix("bytes") {
                    let len: usize = len.parse().map_err(|_| unsupported())?;
                    if len == 0 || len > WORD {
                        return Err(unsupported());
                    }
                    Ok(Self::FixedBytes(len))
                } else {
                    Err(unsupported())
                }
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::String | Self::Bytes | Self::Array(_))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::String => f.write_str("string"),
            Self::Bytes => f.write_str("bytes"),
            Self::FixedBytes(len) => write!(f, "bytes{len}"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// A concrete argument or decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    Uint(U256),
    /// Two's complement representation.
    Int(U256),
    Array(Vec<Token>),
}

impl Token {
    pub fn address(identity: &Identity) -> Result<Self, AbiError> {
        identity
            .to_bytes()
            .map(Self::Address)
            .map_err(|_| AbiError::InvalidAddress(identity.to_string()))
    }

    pub fn addresses(identities: &[Identity]) -> Result<Self, AbiError> {
        identities
            .iter()
            .map(Self::address)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Array)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn uint(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(value) if value.bits() <= 64 => Some(value.low_u64()),
            _ => None,
        }
    }

    pub fn as_identity(&self) -> Option<Identity> {
        match self {
            Self::Address(bytes) => Some(Identity::from_bytes(*bytes)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Token]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Self::String(_) | Self::Bytes(_) | Self::Array(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::FixedBytes(_) => "fixed bytes",
            Self::Uint(_) => "uint",
            Self::Int(_) => "int",
            Self::Array(_) => "array",
        }
    }

    fn matches(&self, kind: &ParamType) -> bool {
        match (self, kind) {
            (Self::Address(_), ParamType::Address)
            | (Self::Bool(_), ParamType::Bool)
            | (Self::String(_), ParamType::String)
            | (Self::Bytes(_), ParamType::Bytes) => true,
            (Self::FixedBytes(bytes), ParamType::FixedBytes(len)) => bytes.len() == *len,
            (Self::Uint(value), ParamType::Uint(bits)) => value.bits() <= *bits,
            (Self::Int(_), ParamType::Int(_)) => true,
            (Self::Array(items), ParamType::Array(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            _ => false,
        }
    }

    /// JSON rendering used for event payloads and diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Address(bytes) => Value::String(Identity::from_bytes(*bytes).to_string()),
            Self::Bool(value) => Value::Bool(*value),
            Self::String(value) => Value::String(value.clone()),
            Self::Bytes(bytes) | Self::FixedBytes(bytes) => {
                Value::String(format!("0x{}", hex::encode(bytes)))
            }
            Self::Uint(value) => {
                if value.bits() <= 64 {
                    Value::from(value.low_u64())
                } else {
                    Value::String(value.to_string())
                }
            }
            Self::Int(value) => {
                if value.bit(255) {
                    let magnitude = (!*value).overflowing_add(U256::one()).0;
                    Value::String(format!("-{magnitude}"))
                } else {
                    Value::String(value.to_string())
                }
            }
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Render arguments for error messages and logs.
pub fn render_tokens(tokens: &[Token]) -> String {
    serde_json::Value::Array(tokens.iter().map(Token::to_json).collect()).to_string()
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encode arguments against declared parameter types.
pub fn encode(params: &[ParamType], tokens: &[Token]) -> Result<Vec<u8>, AbiError> {
    if params.len() != tokens.len() {
        return Err(AbiError::ArityMismatch {
            expected: params.len(),
            actual: tokens.len(),
        });
    }
    for (kind, token) in params.iter().zip(tokens) {
        if !token.matches(kind) {
            return Err(AbiError::TypeMismatch {
                expected: kind.to_string(),
                token: token.kind().to_string(),
            });
        }
    }
    Ok(encode_sequence(tokens))
}

fn encode_sequence(tokens: &[Token]) -> Vec<u8> {
    let head_len = WORD * tokens.len();
    let mut heads = Vec::with_capacity(head_len);
    let mut tails = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            heads.extend_from_slice(&word(U256::from(head_len + tails.len())));
            tails.extend(encode_tail(token));
        } else {
            heads.extend_from_slice(&encode_static(token));
        }
    }

    heads.extend(tails);
    heads
}

fn encode_static(token: &Token) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    match token {
        Token::Address(bytes) => out[12..].copy_from_slice(bytes),
        Token::Bool(value) => out[31] = u8::from(*value),
        Token::Uint(value) | Token::Int(value) => out = word(*value),
        Token::FixedBytes(bytes) => out[..bytes.len()].copy_from_slice(bytes),
        Token::String(_) | Token::Bytes(_) | Token::Array(_) => {}
    }
    out
}

fn encode_tail(token: &Token) -> Vec<u8> {
    match token {
        Token::String(value) => encode_packed_bytes(value.as_bytes()),
        Token::Bytes(bytes) => encode_packed_bytes(bytes),
        Token::Array(items) => {
            let mut out = word(U256::from(items.len())).to_vec();
            out.extend(encode_sequence(items));
            out
        }
        _ => encode_static(token).to_vec(),
    }
}

fn encode_packed_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = word(U256::from(bytes.len())).to_vec();
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn word(value: U256) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    value.to_big_endian(&mut out);
    out
}

// =============================================================================
// DECODING
// =============================================================================

/// Decode a sequence of values of the given types.
pub fn decode(params: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    decode_sequence(params, data, 0)
}

fn decode_sequence(
    params: &[ParamType],
    data: &[u8],
    base: usize,
) -> Result<Vec<Token>, AbiError> {
    params
        .iter()
        .enumerate()
        .map(|(index, kind)| {
            let head = base + index * WORD;
            if kind.is_dynamic() {
                let relative = read_offset(data, head)?;
                decode_tail(kind, data, base + relative)
            } else {
                decode_static(kind, data, head)
            }
        })
        .collect()
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    data.get(offset..offset + WORD)
        .ok_or(AbiError::Truncated { offset })
}

/// Read a word that is used as a length or offset into `data`.
fn read_offset(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let value = U256::from_big_endian(read_word(data, offset)?);
    if value > U256::from(data.len()) {
        return Err(AbiError::OutOfRange(format!(
            "offset or length {value} exceeds {} bytes of data",
            data.len()
        )));
    }
    Ok(value.as_usize())
}

fn decode_static(kind: &ParamType, data: &[u8], offset: usize) -> Result<Token, AbiError> {
    let raw = read_word(data, offset)?;
    match kind {
        ParamType::Address => {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&raw[12..]);
            Ok(Token::Address(bytes))
        }
        ParamType::Bool => match U256::from_big_endian(raw) {
            value if value.is_zero() => Ok(Token::Bool(false)),
            value if value == U256::one() => Ok(Token::Bool(true)),
            value => Err(AbiError::OutOfRange(format!("bool value {value}"))),
        },
        ParamType::Uint(bits) => {
            let value = U256::from_big_endian(raw);
            if value.bits() > *bits {
                return Err(AbiError::OutOfRange(format!("{value} does not fit uint{bits}")));
            }
            Ok(Token::Uint(value))
        }
        ParamType::Int(_) => Ok(Token::Int(U256::from_big_endian(raw))),
        ParamType::FixedBytes(len) => Ok(Token::FixedBytes(raw[..*len].to_vec())),
        dynamic => Err(AbiError::UnsupportedType(format!(
            "{dynamic} decoded as static value"
        ))),
    }
}

fn decode_tail(kind: &ParamType, data: &[u8], offset: usize) -> Result<Token, AbiError> {
    match kind {
        ParamType::String | ParamType::Bytes => {
            let len = read_offset(data, offset)?;
            let start = offset + WORD;
            let bytes = data
                .get(start..start + len)
                .ok_or(AbiError::Truncated { offset: start })?
                .to_vec();
            if *kind == ParamType::String {
                String::from_utf8(bytes)
                    .map(Token::String)
                    .map_err(|_| AbiError::OutOfRange("string is not valid UTF-8".into()))
            } else {
                Ok(Token::Bytes(bytes))
            }
        }
        ParamType::Array(inner) => {
            let len = read_offset(data, offset)?;
            let element_types = vec![(**inner).clone(); len];
            decode_sequence(&element_types, data, offset + WORD).map(Token::Array)
        }
        fixed => decode_static(fixed, data, offset),
    }
}

// =============================================================================
// INTERFACE DESCRIPTOR
// =============================================================================

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamType,
    pub indexed: bool,
}

/// A callable contract function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
}

impl Function {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.inputs)
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Selector followed by the encoded arguments.
    pub fn encode_call(&self, args: &[Token]) -> Result<Vec<u8>, AbiError> {
        let kinds: Vec<ParamType> = self.inputs.iter().map(|p| p.kind.clone()).collect();
        let mut out = self.selector().to_vec();
        out.extend(encode(&kinds, args)?);
        Ok(out)
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        let kinds: Vec<ParamType> = self.outputs.iter().map(|p| p.kind.clone()).collect();
        decode(&kinds, data)
    }

    /// Encode return values (used by in-memory nodes that answer calls).
    pub fn encode_output(&self, values: &[Token]) -> Result<Vec<u8>, AbiError> {
        let kinds: Vec<ParamType> = self.outputs.iter().map(|p| p.kind.clone()).collect();
        encode(&kinds, values)
    }
}

/// An event the contract can emit.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub name: String,
    pub inputs: Vec<Param>,
    pub anonymous: bool,
}

impl EventDescriptor {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.inputs)
    }

    /// First log topic identifying this event.
    pub fn topic(&self) -> [u8; 32] {
        keccak256(self.signature().as_bytes())
    }

    /// Decode a log into `(parameter name, value)` pairs in declaration order.
    ///
    /// Dynamic indexed parameters only exist on the ledger as their hash and
    /// are returned as 32 fixed bytes.
    pub fn decode_log(
        &self,
        topics: &[[u8; 32]],
        data: &[u8],
    ) -> Result<Vec<(String, Token)>, AbiError> {
        let body_kinds: Vec<ParamType> = self
            .inputs
            .iter()
            .filter(|p| !p.indexed)
            .map(|p| p.kind.clone())
            .collect();
        let mut body = decode(&body_kinds, data)?.into_iter();
        let mut indexed_topics = topics.iter().skip(usize::from(!self.anonymous));

        let mut out = Vec::with_capacity(self.inputs.len());
        for param in &self.inputs {
            let value = if param.indexed {
                let topic = indexed_topics
                    .next()
                    .ok_or(AbiError::Truncated { offset: 0 })?;
                if param.kind.is_dynamic() {
                    Token::FixedBytes(topic.to_vec())
                } else {
                    decode_static(&param.kind, topic, 0)?
                }
            } else {
                body.next().ok_or(AbiError::Truncated { offset: data.len() })?
            };
            out.push((param.name.clone(), value));
        }
        Ok(out)
    }

    /// Encode a log body and topics (used by in-memory nodes that emit events).
    pub fn encode_log(&self, values: &[Token]) -> Result<(Vec<[u8; 32]>, Vec<u8>), AbiError> {
        if values.len() != self.inputs.len() {
            return Err(AbiError::ArityMismatch {
                expected: self.inputs.len(),
                actual: values.len(),
            });
        }
        let mut topics = Vec::new();
        if !self.anonymous {
            topics.push(self.topic());
        }
        let mut body_kinds = Vec::new();
        let mut body_values = Vec::new();
        for (param, value) in self.inputs.iter().zip(values) {
            if param.indexed {
                if param.kind.is_dynamic() {
                    return Err(AbiError::UnsupportedType(format!(
                        "indexed {} cannot be encoded",
                        param.kind
                    )));
                }
                if !value.matches(&param.kind) {
                    return Err(AbiError::TypeMismatch {
                        expected: param.kind.to_string(),
                        token: value.kind().to_string(),
                    });
                }
                topics.push(encode_static(value));
            } else {
                body_kinds.push(param.kind.clone());
                body_values.push(value.clone());
            }
        }
        Ok((topics, encode(&body_kinds, &body_values)?))
    }
}

fn signature(name: &str, inputs: &[Param]) -> String {
    let kinds: Vec<String> = inputs.iter().map(|p| p.kind.to_string()).collect();
    format!("{}({})", name, kinds.join(","))
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type", default = "default_entry_kind")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<RawParam>,
    #[serde(default)]
    outputs: Vec<RawParam>,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Deserialize)]
struct RawParam {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    indexed: bool,
}

fn default_entry_kind() -> String {
    "function".to_string()
}

fn convert_params(raw: &[RawParam]) -> Result<Vec<Param>, AbiError> {
    raw.iter()
        .map(|p| {
            Ok(Param {
                name: p.name.clone(),
                kind: ParamType::parse(&p.kind)?,
                indexed: p.indexed,
            })
        })
        .collect()
}

fn convert_entry_params(entry: &str, raw: &[RawParam]) -> Result<Vec<Param>, AbiError> {
    convert_params(raw).map_err(|e| match e {
        AbiError::UnsupportedType(kind) => AbiError::UnsupportedType(format!("{kind} in {entry}")),
        other => other,
    })
}

/// Parsed interface descriptor of the deployed contract.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    functions: HashMap<String, Function>,
    events: Vec<EventDescriptor>,
}

impl ContractAbi {
    pub fn from_json(json: &str) -> Result<Self, AbiError> {
        let entries: Vec<RawEntry> = serde_json::from_str(json)
            .map_err(|e| AbiError::InvalidDescriptor(e.to_string()))?;

        let mut abi = Self::default();
        for entry in entries {
            match entry.kind.as_str() {
                "function" => {
                    let inputs = convert_entry_params(&entry.name, &entry.inputs)?;
                    let outputs = convert_entry_params(&entry.name, &entry.outputs)?;
                    abi.functions.entry(entry.name.clone()).or_insert(Function {
                        name: entry.name,
                        inputs,
                        outputs,
                    });
                }
                "event" => {
                    let inputs = convert_entry_params(&entry.name, &entry.inputs)?;
                    if abi.events.iter().any(|e| e.name == entry.name) {
                        continue;
                    }
                    abi.events.push(EventDescriptor {
                        name: entry.name,
                        inputs,
                        anonymous: entry.anonymous,
                    });
                }
                _ => {}
            }
        }
        Ok(abi)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn event_by_topic(&self, topic: &[u8; 32]) -> Option<&EventDescriptor> {
        self.events
            .iter()
            .find(|e| !e.anonymous && &e.topic() == topic)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventDescriptor> {
        self.events.iter()
    }
}
