// bpf-vm/src/abi.rs

//! Solidity ABI: types, values, head/tail encoding and ABI documents.

use crate::{ContractError, ContractResult};
use blockchain_crypto::{keccak256, Address};
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

const WORD: usize = 32;

fn abi_err(msg: impl Into<String>) -> ContractError {
    ContractError::AbiError(msg.into())
}

/// Closed set of supported parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AbiType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    Bytes,
    FixedBytes(usize),
    String,
    FixedArray(Box<AbiType>, usize),
}

impl AbiType {
    pub fn parse(s: &str) -> ContractResult<Self> {
        let s = s.trim();

        if let Some(open) = s.strip_suffix(']').and_then(|rest| rest.rfind('[')) {
            let inner = &s[..open];
            let size = &s[open + 1..s.len() - 1];
            if size.is_empty() {
                return Err(abi_err(format!("dynamic array type '{}' is not supported", s)));
            }
            let len: usize = size
                .parse()
                .map_err(|_| abi_err(format!("invalid array length in '{}'", s)))?;
            if len == 0 {
                return Err(abi_err(format!("zero-length array type '{}'", s)));
            }
            return Ok(AbiType::FixedArray(Box::new(AbiType::parse(inner)?), len));
        }

        match s {
            "address" => return Ok(AbiType::Address),
            "bool" => return Ok(AbiType::Bool),
            "string" => return Ok(AbiType::String),
            "bytes" => return Ok(AbiType::Bytes),
            "uint" => return Ok(AbiType::Uint(256)),
            "int" => return Ok(AbiType::Int(256)),
            _ => {}
        }

        let bits_of = |digits: &str| -> ContractResult<usize> {
            let bits: usize = digits
                .parse()
                .map_err(|_| abi_err(format!("unknown ABI type '{}'", s)))?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(abi_err(format!("invalid integer width in '{}'", s)));
            }
            Ok(bits)
        };

        if let Some(digits) = s.strip_prefix("uint") {
            return Ok(AbiType::Uint(bits_of(digits)?));
        }
        if let Some(digits) = s.strip_prefix("int") {
            return Ok(AbiType::Int(bits_of(digits)?));
        }
        if let Some(digits) = s.strip_prefix("bytes") {
            let len: usize = digits
                .parse()
                .map_err(|_| abi_err(format!("unknown ABI type '{}'", s)))?;
            if len == 0 || len > 32 {
                return Err(abi_err(format!("invalid fixed bytes length in '{}'", s)));
            }
            return Ok(AbiType::FixedBytes(len));
        }

        Err(abi_err(format!("unknown ABI type '{}'", s)))
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String => true,
            AbiType::FixedArray(inner, _) => inner.is_dynamic(),
            _ => false,
        }
    }

    /// Number of words the type occupies in the head of a tuple
    pub fn head_words(&self) -> usize {
        match self {
            AbiType::FixedArray(inner, len) if !self.is_dynamic() => inner.head_words() * len,
            _ => 1,
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Uint(bits) => write!(f, "uint{}", bits),
            AbiType::Int(bits) => write!(f, "int{}", bits),
            AbiType::Address => write!(f, "address"),
            AbiType::Bool => write!(f, "bool"),
            AbiType::Bytes => write!(f, "bytes"),
            AbiType::FixedBytes(len) => write!(f, "bytes{}", len),
            AbiType::String => write!(f, "string"),
            AbiType::FixedArray(inner, len) => write!(f, "{}[{}]", inner, len),
        }
    }
}

impl TryFrom<String> for AbiType {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AbiType::parse(&value)
    }
}

impl From<AbiType> for String {
    fn from(value: AbiType) -> Self {
        value.to_string()
    }
}

/// A typed ABI value. `Int` holds the two's-complement 256-bit word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(U256),
    Int(U256),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    String(String),
    FixedArray(Vec<AbiValue>),
}

fn u256_word(value: U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

fn usize_word(value: usize) -> [u8; WORD] {
    u256_word(U256::from(value))
}

fn is_negative(raw: U256) -> bool {
    raw.bit(255)
}

fn negate(raw: U256) -> U256 {
    (!raw).overflowing_add(U256::one()).0
}

fn i64_word(value: i64) -> U256 {
    if value >= 0 {
        U256::from(value as u64)
    } else {
        !U256::from((!value) as u64)
    }
}

fn uint_fits(value: U256, bits: usize) -> bool {
    bits >= 256 || (value >> bits).is_zero()
}

fn int_fits(raw: U256, bits: usize) -> bool {
    if bits >= 256 {
        return true;
    }
    let high = raw >> (bits - 1);
    high.is_zero() || high == (U256::MAX >> (bits - 1))
}

fn parse_hex_bytes(s: &str) -> ContractResult<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| abi_err(format!("invalid hex: {}", e)))
}

fn parse_u256(value: &Value) -> ContractResult<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| abi_err(format!("expected unsigned integer, got {}", n))),
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16).ok(),
                None => U256::from_dec_str(s).ok(),
            };
            parsed.ok_or_else(|| abi_err(format!("invalid unsigned integer '{}'", s)))
        }
        other => Err(abi_err(format!("expected unsigned integer, got {}", other))),
    }
}

fn parse_i256(value: &Value) -> ContractResult<U256> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i64_word)
            .ok_or_else(|| abi_err(format!("expected integer, got {}", n))),
        Value::String(s) => {
            let s = s.trim();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s),
            };
            let magnitude = U256::from_dec_str(digits)
                .map_err(|_| abi_err(format!("invalid integer '{}'", s)))?;
            let limit = U256::one() << 255usize;
            if negative {
                if magnitude > limit {
                    return Err(abi_err(format!("integer '{}' out of range", s)));
                }
                Ok(negate(magnitude))
            } else {
                if magnitude >= limit {
                    return Err(abi_err(format!("integer '{}' out of range", s)));
                }
                Ok(magnitude)
            }
        }
        other => Err(abi_err(format!("expected integer, got {}", other))),
    }
}

impl AbiValue {
    /// Build a value of type `ty` from its JSON form
    ///
    /// Integers accept JSON numbers or decimal/`0x` hex strings; addresses
    /// and byte strings accept hex strings.
    pub fn from_json(ty: &AbiType, value: &Value) -> ContractResult<Self> {
        match ty {
            AbiType::Uint(bits) => {
                let v = parse_u256(value)?;
                if !uint_fits(v, *bits) {
                    return Err(abi_err(format!("value {} does not fit uint{}", v, bits)));
                }
                Ok(AbiValue::Uint(v))
            }
            AbiType::Int(bits) => {
                let v = parse_i256(value)?;
                if !int_fits(v, *bits) {
                    return Err(abi_err(format!("value {} does not fit int{}", value, bits)));
                }
                Ok(AbiValue::Int(v))
            }
            AbiType::Address => match value {
                Value::String(s) => Address::from_hex(s)
                    .map(AbiValue::Address)
                    .map_err(|e| abi_err(e.to_string())),
                other => Err(abi_err(format!("expected address string, got {}", other))),
            },
            AbiType::Bool => match value {
                Value::Bool(b) => Ok(AbiValue::Bool(*b)),
                Value::String(s) if s == "true" || s == "false" => Ok(AbiValue::Bool(s == "true")),
                other => Err(abi_err(format!("expected bool, got {}", other))),
            },
            AbiType::Bytes => match value {
                Value::String(s) => Ok(AbiValue::Bytes(parse_hex_bytes(s)?)),
                other => Err(abi_err(format!("expected hex bytes, got {}", other))),
            },
            AbiType::FixedBytes(len) => match value {
                Value::String(s) => {
                    let bytes = parse_hex_bytes(s)?;
                    if bytes.len() != *len {
                        return Err(abi_err(format!("expected {} bytes, got {}", len, bytes.len())));
                    }
                    Ok(AbiValue::FixedBytes(bytes))
                }
                other => Err(abi_err(format!("expected hex bytes, got {}", other))),
            },
            AbiType::String => match value {
                Value::String(s) => Ok(AbiValue::String(s.clone())),
                other => Err(abi_err(format!("expected string, got {}", other))),
            },
            AbiType::FixedArray(inner, len) => match value {
                Value::Array(items) if items.len() == *len => items
                    .iter()
                    .map(|item| AbiValue::from_json(inner, item))
                    .collect::<ContractResult<Vec<_>>>()
                    .map(AbiValue::FixedArray),
                other => Err(abi_err(format!("expected array of {} items, got {}", len, other))),
            },
        }
    }

    /// JSON form; integers that fit 64 bits become numbers, larger ones decimal strings
    pub fn to_json(&self) -> Value {
        match self {
            AbiValue::Uint(v) => {
                if v.bits() <= 64 {
                    json!(v.low_u64())
                } else {
                    Value::String(v.to_string())
                }
            }
            AbiValue::Int(raw) => {
                if int_fits(*raw, 64) {
                    json!(raw.low_u64() as i64)
                } else if is_negative(*raw) {
                    Value::String(format!("-{}", negate(*raw)))
                } else {
                    Value::String(raw.to_string())
                }
            }
            AbiValue::Address(address) => Value::String(address.to_hex()),
            AbiValue::Bool(b) => Value::Bool(*b),
            AbiValue::Bytes(bytes) | AbiValue::FixedBytes(bytes) => {
                Value::String(format!("0x{}", hex::encode(bytes)))
            }
            AbiValue::String(s) => Value::String(s.clone()),
            AbiValue::FixedArray(items) => Value::Array(items.iter().map(AbiValue::to_json).collect()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiValue::Bytes(_) | AbiValue::String(_) => true,
            AbiValue::FixedArray(items) => items.iter().any(AbiValue::is_dynamic),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            AbiValue::FixedArray(items) if !self.is_dynamic() => {
                items.iter().map(AbiValue::head_len).sum()
            }
            _ => WORD,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            AbiValue::Uint(v) | AbiValue::Int(v) => out.extend_from_slice(&u256_word(*v)),
            AbiValue::Address(address) => out.extend_from_slice(&address.to_word()),
            AbiValue::Bool(b) => out.extend_from_slice(&usize_word(usize::from(*b))),
            AbiValue::FixedBytes(bytes) => {
                let mut word = [0u8; WORD];
                word[..bytes.len()].copy_from_slice(bytes);
                out.extend_from_slice(&word);
            }
            AbiValue::Bytes(bytes) => encode_packed_bytes(bytes, out),
            AbiValue::String(s) => encode_packed_bytes(s.as_bytes(), out),
            AbiValue::FixedArray(items) => out.extend_from_slice(&encode(items)),
        }
    }
}

fn encode_packed_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&usize_word(bytes.len()));
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
}

/// Standard tuple encoding (no selector)
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let head_len: usize = values.iter().map(AbiValue::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for value in values {
        if value.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            value.encode_into(&mut tail);
        } else {
            value.encode_into(&mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn read_word(data: &[u8], pos: usize) -> ContractResult<[u8; WORD]> {
    let end = pos.checked_add(WORD).ok_or_else(|| abi_err("offset overflow"))?;
    let slice = data
        .get(pos..end)
        .ok_or_else(|| abi_err(format!("data too short: need {} bytes, have {}", end, data.len())))?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(slice);
    Ok(word)
}

fn read_usize(data: &[u8], pos: usize) -> ContractResult<usize> {
    let value = U256::from_big_endian(&read_word(data, pos)?);
    if value > U256::from(u32::MAX) {
        return Err(abi_err(format!("offset or length {} too large", value)));
    }
    Ok(value.as_usize())
}

/// Strict tuple decoding of `data` against `types`
pub fn decode(types: &[AbiType], data: &[u8]) -> ContractResult<Vec<AbiValue>> {
    let mut values = Vec::with_capacity(types.len());
    let mut pos = 0usize;

    for ty in types {
        if ty.is_dynamic() {
            let offset = read_usize(data, pos)?;
            let tail = data
                .get(offset..)
                .ok_or_else(|| abi_err(format!("offset {} past end of data", offset)))?;
            values.push(decode_single(ty, tail)?);
            pos += WORD;
        } else {
            let head = data
                .get(pos..)
                .ok_or_else(|| abi_err("data too short"))?;
            values.push(decode_single(ty, head)?);
            pos += WORD * ty.head_words();
        }
    }

    Ok(values)
}

fn decode_single(ty: &AbiType, data: &[u8]) -> ContractResult<AbiValue> {
    match ty {
        AbiType::Uint(bits) => {
            let v = U256::from_big_endian(&read_word(data, 0)?);
            if !uint_fits(v, *bits) {
                return Err(abi_err(format!("value does not fit uint{}", bits)));
            }
            Ok(AbiValue::Uint(v))
        }
        AbiType::Int(bits) => {
            let v = U256::from_big_endian(&read_word(data, 0)?);
            if !int_fits(v, *bits) {
                return Err(abi_err(format!("value is not a sign-extended int{}", bits)));
            }
            Ok(AbiValue::Int(v))
        }
        AbiType::Address => {
            let word = read_word(data, 0)?;
            if word[..12].iter().any(|b| *b != 0) {
                return Err(abi_err("address word has non-zero high bytes"));
            }
            Ok(AbiValue::Address(Address::from_word(&word)))
        }
        AbiType::Bool => {
            let word = read_word(data, 0)?;
            if word[..31].iter().any(|b| *b != 0) || word[31] > 1 {
                return Err(abi_err("bool word is neither 0 nor 1"));
            }
            Ok(AbiValue::Bool(word[31] == 1))
        }
        AbiType::FixedBytes(len) => {
            let word = read_word(data, 0)?;
            if word[*len..].iter().any(|b| *b != 0) {
                return Err(abi_err(format!("bytes{} has non-zero padding", len)));
            }
            Ok(AbiValue::FixedBytes(word[..*len].to_vec()))
        }
        AbiType::Bytes => Ok(AbiValue::Bytes(decode_packed_bytes(data)?)),
        AbiType::String => {
            let bytes = decode_packed_bytes(data)?;
            String::from_utf8(bytes)
                .map(AbiValue::String)
                .map_err(|_| abi_err("string is not valid UTF-8"))
        }
        AbiType::FixedArray(inner, len) => {
            let types = vec![(**inner).clone(); *len];
            decode(&types, data).map(AbiValue::FixedArray)
        }
    }
}

fn decode_packed_bytes(data: &[u8]) -> ContractResult<Vec<u8>> {
    let len = read_usize(data, 0)?;
    data.get(WORD..WORD + len)
        .map(|bytes| bytes.to_vec())
        .ok_or_else(|| abi_err(format!("byte string of length {} runs past end of data", len)))
}

/// Named, typed parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AbiType,
}

/// Callable function entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<Param>,
    pub outputs: Vec<Param>,
    pub state_mutability: String,
}

impl Function {
    /// Canonical signature, e.g. `transfer(address,uint256)`
    pub fn signature(&self) -> String {
        signature(&self.name, &self.inputs)
    }

    /// First four bytes of keccak256(signature)
    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }

    pub fn input_types(&self) -> Vec<AbiType> {
        self.inputs.iter().map(|p| p.kind.clone()).collect()
    }

    pub fn output_types(&self) -> Vec<AbiType> {
        self.outputs.iter().map(|p| p.kind.clone()).collect()
    }

    /// Validate JSON arguments against the inputs and ABI-encode them
    pub fn encode_args(&self, args: &[Value]) -> ContractResult<Vec<u8>> {
        encode_params(&self.name, &self.inputs, args)
    }

    /// Selector followed by encoded arguments
    pub fn encode_call(&self, args: &[Value]) -> ContractResult<Vec<u8>> {
        let mut data = self.selector().to_vec();
        data.extend_from_slice(&self.encode_args(args)?);
        Ok(data)
    }

    /// Decode return data: null for no outputs, a value for one, an array otherwise
    pub fn decode_output(&self, data: &[u8]) -> ContractResult<Value> {
        if self.outputs.is_empty() {
            return Ok(Value::Null);
        }
        let values = decode(&self.output_types(), data)?;
        let mut json: Vec<Value> = values.iter().map(AbiValue::to_json).collect();
        if json.len() == 1 {
            Ok(json.remove(0))
        } else {
            Ok(Value::Array(json))
        }
    }
}

fn signature(name: &str, inputs: &[Param]) -> String {
    let types: Vec<String> = inputs.iter().map(|p| p.kind.to_string()).collect();
    format!("{}({})", name, types.join(","))
}

/// First four bytes of keccak256 of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_params(name: &str, params: &[Param], args: &[Value]) -> ContractResult<Vec<u8>> {
    if params.len() != args.len() {
        return Err(ContractError::InvalidArguments(format!(
            "{} expects {} arguments, got {}",
            name,
            params.len(),
            args.len()
        )));
    }
    let values = params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| {
            AbiValue::from_json(&param.kind, arg).map_err(|e| {
                ContractError::InvalidArguments(format!("{} argument {}: {}", name, i, e))
            })
        })
        .collect::<ContractResult<Vec<_>>>()?;
    Ok(encode(&values))
}

/// Parsed ABI document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAbi {
    /// Constructor inputs, if the contract declares a constructor
    pub constructor: Option<Vec<Param>>,
    pub functions: BTreeMap<String, Function>,
}

impl ContractAbi {
    /// Parse either `{"functions": {name: {inputs, outputs}}}` or a Solidity
    /// JSON array (optionally wrapped as `{"abi": [...]}`)
    pub fn from_json(value: &Value) -> ContractResult<Self> {
        match value {
            Value::Array(items) => Self::from_list(items),
            Value::Object(map) => match (map.get("abi"), map.get("functions")) {
                (Some(Value::Array(items)), _) => Self::from_list(items),
                (_, Some(Value::Object(functions))) => Self::from_function_map(map, functions),
                _ => Err(abi_err("ABI must contain functions")),
            },
            _ => Err(abi_err("ABI must be a JSON object or array")),
        }
    }

    pub fn from_json_str(text: &str) -> ContractResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| abi_err(format!("invalid ABI JSON: {}", e)))?;
        Self::from_json(&value)
    }

    /// Whether a JSON ABI document uses the Solidity array format
    pub fn is_solidity_format(value: &Value) -> bool {
        match value {
            Value::Array(_) => true,
            Value::Object(map) => matches!(map.get("abi"), Some(Value::Array(_))),
            _ => false,
        }
    }

    fn from_function_map(root: &Map<String, Value>, functions: &Map<String, Value>) -> ContractResult<Self> {
        let mut abi = ContractAbi::default();

        for (name, def) in functions {
            let function = Function {
                name: name.clone(),
                inputs: parse_params(def.get("inputs"))?,
                outputs: parse_params(def.get("outputs"))?,
                state_mutability: def
                    .get("stateMutability")
                    .and_then(Value::as_str)
                    .unwrap_or("nonpayable")
                    .to_string(),
            };
            abi.functions.insert(name.clone(), function);
        }

        if let Some(constructor) = root.get("constructor") {
            abi.constructor = Some(parse_params(constructor.get("inputs"))?);
        }

        Ok(abi)
    }

    fn from_list(items: &[Value]) -> ContractResult<Self> {
        let mut abi = ContractAbi::default();

        for item in items {
            let kind = item.get("type").and_then(Value::as_str).unwrap_or("function");
            match kind {
                "function" => {
                    let name = item
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| abi_err("function entry without a name"))?;
                    if abi.functions.contains_key(name) {
                        return Err(abi_err(format!("overloaded function '{}' is not supported", name)));
                    }
                    let function = Function {
                        name: name.to_string(),
                        inputs: parse_params(item.get("inputs"))?,
                        outputs: parse_params(item.get("outputs"))?,
                        state_mutability: item
                            .get("stateMutability")
                            .and_then(Value::as_str)
                            .unwrap_or("nonpayable")
                            .to_string(),
                    };
                    abi.functions.insert(name.to_string(), function);
                }
                "constructor" => {
                    abi.constructor = Some(parse_params(item.get("inputs"))?);
                }
                // events, errors, fallback and receive carry no callable surface here
                _ => {}
            }
        }

        Ok(abi)
    }

    pub fn function(&self, name: &str) -> ContractResult<&Function> {
        self.functions
            .get(name)
            .ok_or_else(|| ContractError::FunctionNotFound(name.to_string()))
    }

    pub fn function_by_selector(&self, selector: [u8; 4]) -> Option<&Function> {
        self.functions.values().find(|f| f.selector() == selector)
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    /// Encode constructor arguments; no constructor accepts only an empty list
    pub fn encode_constructor_args(&self, args: &[Value]) -> ContractResult<Vec<u8>> {
        match &self.constructor {
            Some(params) => encode_params("constructor", params, args),
            None if args.is_empty() => Ok(Vec::new()),
            None => Err(ContractError::InvalidArguments(
                "contract has no constructor but arguments were given".into(),
            )),
        }
    }

    /// Solidity JSON array form
    pub fn to_json(&self) -> Value {
        let params = |ps: &[Param]| -> Value {
            Value::Array(
                ps.iter()
                    .map(|p| json!({"name": p.name, "type": p.kind.to_string()}))
                    .collect(),
            )
        };

        let mut items = Vec::new();
        if let Some(inputs) = &self.constructor {
            items.push(json!({"type": "constructor", "inputs": params(inputs)}));
        }
        for function in self.functions.values() {
            items.push(json!({
                "type": "function",
                "name": function.name,
                "inputs": params(&function.inputs),
                "outputs": params(&function.outputs),
                "stateMutability": function.state_mutability,
            }));
        }
        Value::Array(items)
    }
}

/// Register view of the first four encoded arguments
///
/// Each register receives the low 64 bits of the argument's first head
/// word: the value itself for static scalars, the offset of the length
/// word for dynamic types.
pub fn register_view(types: &[AbiType], encoded: &[u8]) -> [u64; 4] {
    let mut registers = [0u64; 4];
    let mut pos = 0usize;
    for (register, ty) in registers.iter_mut().zip(types) {
        if let Some(word) = encoded.get(pos + 24..pos + WORD) {
            let mut low = [0u8; 8];
            low.copy_from_slice(word);
            *register = u64::from_be_bytes(low);
        }
        pos += WORD * ty.head_words();
    }
    registers
}

fn parse_params(value: Option<&Value>) -> ContractResult<Vec<Param>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(abi_err(format!("parameter list must be an array, got {}", other))),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(ty) => Ok(Param {
                name: format!("arg{}", i),
                kind: AbiType::parse(ty)?,
            }),
            Value::Object(map) => {
                let ty = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| abi_err("parameter without a type"))?;
                Ok(Param {
                    name: map.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    kind: AbiType::parse(ty)?,
                })
            }
            other => Err(abi_err(format!("invalid parameter {}", other))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_types() {
        assert_eq!(AbiType::parse("uint").unwrap(), AbiType::Uint(256));
        assert_eq!(AbiType::parse("int8").unwrap(), AbiType::Int(8));
        assert_eq!(AbiType::parse("bytes32").unwrap(), AbiType::FixedBytes(32));
        assert_eq!(
            AbiType::parse("address[2]").unwrap(),
            AbiType::FixedArray(Box::new(AbiType::Address), 2)
        );
        assert!(AbiType::parse("uint7").is_err());
        assert!(AbiType::parse("bytes33").is_err());
        assert!(AbiType::parse("uint256[]").is_err());
        assert!(AbiType::parse("tuple").is_err());
    }

    #[test]
    fn test_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn test_encode_static() {
        let encoded = encode(&[AbiValue::Uint(U256::from(42)), AbiValue::Bool(true)]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 42);
        assert_eq!(encoded[63], 1);
    }

    #[test]
    fn test_encode_dynamic_layout() {
        // f(uint256, string) with (1, "abc")
        let encoded = encode(&[AbiValue::Uint(U256::one()), AbiValue::String("abc".into())]);
        assert_eq!(encoded.len(), 32 * 4);
        assert_eq!(encoded[63], 0x40); // offset of the tail
        assert_eq!(encoded[95], 3); // length
        assert_eq!(&encoded[96..99], b"abc");
    }

    #[test]
    fn test_negative_int() {
        let value = AbiValue::from_json(&AbiType::Int(8), &json!(-1)).unwrap();
        let encoded = encode(&[value.clone()]);
        assert!(encoded.iter().all(|b| *b == 0xff));
        let decoded = decode(&[AbiType::Int(8)], &encoded).unwrap();
        assert_eq!(decoded[0], value);
        assert_eq!(decoded[0].to_json(), json!(-1));
        assert!(AbiValue::from_json(&AbiType::Int(8), &json!(128)).is_err());
        assert!(AbiValue::from_json(&AbiType::Int(8), &json!(-128)).is_ok());
    }

    #[test]
    fn test_strict_decoding() {
        let mut word = [0u8; 32];
        word[31] = 2;
        assert!(decode(&[AbiType::Bool], &word).is_err());
        word[31] = 0;
        word[0] = 1;
        assert!(decode(&[AbiType::Address], &word).is_err());
        assert!(decode(&[AbiType::Uint(8)], &word).is_err());
        assert!(decode(&[AbiType::Uint(256)], &word[..31]).is_err());
    }

    #[test]
    fn test_truncated_dynamic_rejected() {
        let mut encoded = encode(&[AbiValue::Bytes(vec![1u8; 40])]);
        encoded.truncate(80);
        assert!(decode(&[AbiType::Bytes], &encoded).is_err());
    }

    #[test]
    fn test_uint_from_strings() {
        let ty = AbiType::Uint(256);
        assert_eq!(
            AbiValue::from_json(&ty, &json!("0xff")).unwrap(),
            AbiValue::Uint(U256::from(255))
        );
        let big = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let value = AbiValue::from_json(&ty, &json!(big)).unwrap();
        assert_eq!(value.to_json(), json!(big));
        assert!(AbiValue::from_json(&AbiType::Uint(8), &json!(256)).is_err());
        assert!(AbiValue::from_json(&ty, &json!(-1)).is_err());
    }

    #[test]
    fn test_parse_function_map_format() {
        let abi = ContractAbi::from_json(&json!({
            "functions": {
                "setValue": {"inputs": [{"name": "v", "type": "uint256"}], "outputs": []},
                "getValue": {"inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}
            },
            "constructor": {"inputs": []}
        }))
        .unwrap();

        assert!(abi.has_constructor());
        assert_eq!(abi.functions.len(), 2);
        let set = abi.function("setValue").unwrap();
        assert_eq!(set.signature(), "setValue(uint256)");
        assert_eq!(abi.function_by_selector(set.selector()), Some(set));
        assert_eq!(abi.function("getValue").unwrap().state_mutability, "view");
        assert!(matches!(abi.function("nope"), Err(ContractError::FunctionNotFound(_))));
    }

    #[test]
    fn test_parse_solidity_list_format() {
        let list = json!([
            {"type": "constructor", "inputs": [{"name": "x", "type": "uint256"}]},
            {"type": "function", "name": "get", "inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"},
            {"type": "event", "name": "Changed", "inputs": []}
        ]);
        assert!(ContractAbi::is_solidity_format(&list));
        let abi = ContractAbi::from_json(&list).unwrap();
        assert_eq!(abi.constructor.as_ref().map(Vec::len), Some(1));
        assert_eq!(abi.functions.len(), 1);

        let wrapped = ContractAbi::from_json(&json!({"abi": list})).unwrap();
        assert_eq!(wrapped, abi);
        assert_eq!(ContractAbi::from_json(&abi.to_json()).unwrap(), abi);
    }

    #[test]
    fn test_overloads_rejected() {
        let list = json!([
            {"type": "function", "name": "f", "inputs": [{"type": "uint256"}]},
            {"type": "function", "name": "f", "inputs": [{"type": "bool"}]}
        ]);
        assert!(ContractAbi::from_json(&list).is_err());
    }

    #[test]
    fn test_missing_functions_rejected() {
        assert!(ContractAbi::from_json(&json!({"name": "x"})).is_err());
        assert!(ContractAbi::from_json(&json!("abi")).is_err());
    }

    #[test]
    fn test_argument_count_checked() {
        let abi = ContractAbi::from_json(&json!({
            "functions": {"f": {"inputs": [{"name": "a", "type": "uint256"}]}}
        }))
        .unwrap();
        let f = abi.function("f").unwrap();
        assert!(matches!(f.encode_args(&[]), Err(ContractError::InvalidArguments(_))));
        assert!(matches!(
            f.encode_args(&[json!("hello")]),
            Err(ContractError::InvalidArguments(_))
        ));
        assert_eq!(f.encode_call(&[json!(1)]).unwrap().len(), 36);
    }

    #[test]
    fn test_register_view() {
        let types = [AbiType::Uint(256), AbiType::String, AbiType::Bool];
        let encoded = encode(&[
            AbiValue::Uint(U256::from(7)),
            AbiValue::String("hi".into()),
            AbiValue::Bool(true),
        ]);
        assert_eq!(register_view(&types, &encoded), [7, 96, 1, 0]);
    }

    #[test]
    fn test_abi_type_serde() {
        let param: Param = serde_json::from_value(json!({"name": "a", "type": "bytes4[3]"})).unwrap();
        assert_eq!(param.kind.to_string(), "bytes4[3]");
        assert_eq!(serde_json::to_value(&param).unwrap()["type"], json!("bytes4[3]"));
    }

    fn value_strategy() -> impl Strategy<Value = (AbiType, AbiValue)> {
        let leaf = prop_oneof![
            any::<[u8; 32]>().prop_map(|b| (AbiType::Uint(256), AbiValue::Uint(U256::from_big_endian(&b)))),
            any::<[u8; 20]>().prop_map(|b| (AbiType::Address, AbiValue::Address(Address::new(b)))),
            any::<bool>().prop_map(|b| (AbiType::Bool, AbiValue::Bool(b))),
            proptest::collection::vec(any::<u8>(), 0..80).prop_map(|b| (AbiType::Bytes, AbiValue::Bytes(b))),
            ".{0,40}".prop_map(|s| (AbiType::String, AbiValue::String(s))),
        ];
        leaf.prop_recursive(2, 8, 3, |inner| {
            (inner, 1usize..3).prop_flat_map(|((ty, value), n)| {
                let ty = AbiType::FixedArray(Box::new(ty), n);
                Just((ty, AbiValue::FixedArray(vec![value; n])))
            })
        })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_identity(items in proptest::collection::vec(value_strategy(), 0..4)) {
            let (types, values): (Vec<_>, Vec<_>) = items.into_iter().unzip();
            let encoded = encode(&values);
            prop_assert_eq!(encoded.len() % 32, 0);
            let decoded = decode(&types, &encoded).unwrap();
            prop_assert_eq!(decoded, values);
        }
    }
}
