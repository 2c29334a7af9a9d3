use std::collections::HashMap;

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Global {
        module: String,
        name: String,
    },
    Object {
        callable: Box<Value>,
        args: Box<Value>,
        state: Option<Box<Value>>,
    },
}

impl Value {
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Str(text) => Some(text.clone()),
            Value::Bytes(bytes) => Some(bytes.iter().map(|&b| b as char).collect()),
            Value::Object { .. } => self
                .as_bytes()
                .map(|bytes| bytes.iter().map(|&b| b as char).collect()),
            _ => None,
        }
    }

    // Protocol 2 pickles `bytes` as `_codecs.encode(text, "latin1")`.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Some(bytes.clone()),
            Value::Object { callable, args, .. } => {
                let Value::Global { module, name } = callable.as_ref() else {
                    return None;
                };
                if module != "_codecs" || name != "encode" {
                    return None;
                }
                let Value::Tuple(items) = args.as_ref() else {
                    return None;
                };
                let text = match items.first() {
                    Some(Value::Str(text)) => text,
                    _ => return None,
                };
                text.chars()
                    .map(|ch| u8::try_from(u32::from(ch)).ok())
                    .collect()
            }
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let Value::Dict(entries) = self else {
            return None;
        };
        entries
            .iter()
            .find(|(k, _)| k.as_text().as_deref() == Some(key))
            .map(|(_, v)| v)
    }
}

pub fn from_slice(data: &[u8]) -> Result<Value, IngestError> {
    Machine::new(data).run()
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Value, IngestError> {
        loop {
            let op = self.read_u8()?;
            match op {
                0x80 => {
                    let protocol = self.read_u8()?;
                    if protocol > 5 {
                        return Err(err(format!("unsupported protocol {protocol}")));
                    }
                }
                0x95 => {
                    self.take(8)?;
                }
                b'.' => return self.pop(),
                b'(' => self.marks.push(self.stack.len()),
                b')' => self.stack.push(Value::Tuple(Vec::new())),
                b']' => self.stack.push(Value::List(Vec::new())),
                b'}' => self.stack.push(Value::Dict(Vec::new())),
                b'N' => self.stack.push(Value::None),
                0x88 => self.stack.push(Value::Bool(true)),
                0x89 => self.stack.push(Value::Bool(false)),
                b'J' => {
                    let raw = self.take_array::<4>()?;
                    self.stack.push(Value::Int(i64::from(i32::from_le_bytes(raw))));
                }
                b'K' => {
                    let value = self.read_u8()?;
                    self.stack.push(Value::Int(i64::from(value)));
                }
                b'M' => {
                    let raw = self.take_array::<2>()?;
                    self.stack.push(Value::Int(i64::from(u16::from_le_bytes(raw))));
                }
                0x8a => {
                    let len = usize::from(self.read_u8()?);
                    let raw = self.take(len)?;
                    self.stack.push(Value::Int(decode_long(raw)?));
                }
                b'G' => {
                    let raw = self.take_array::<8>()?;
                    self.stack.push(Value::Float(f64::from_be_bytes(raw)));
                }
                b'I' => {
                    let line = self.read_line()?;
                    let value = match line.as_str() {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        other => Value::Int(
                            other
                                .parse()
                                .map_err(|_| err(format!("bad INT literal {other}")))?,
                        ),
                    };
                    self.stack.push(value);
                }
                b'U' | b'C' => {
                    let len = usize::from(self.read_u8()?);
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                b'T' | b'B' => {
                    let len = self.read_u32_len()?;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                0x8e => {
                    let len = self.read_u64_len()?;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                }
                0x8c => {
                    let len = usize::from(self.read_u8()?);
                    let text = self.take_utf8(len)?;
                    self.stack.push(Value::Str(text));
                }
                b'X' => {
                    let len = self.read_u32_len()?;
                    let text = self.take_utf8(len)?;
                    self.stack.push(Value::Str(text));
                }
                0x8d => {
                    let len = self.read_u64_len()?;
                    let text = self.take_utf8(len)?;
                    self.stack.push(Value::Str(text));
                }
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Tuple(items));
                }
                0x85 | 0x86 | 0x87 => {
                    let count = usize::from(op - 0x84);
                    if self.stack.len() < count {
                        return Err(err("stack underflow building tuple".to_string()));
                    }
                    let items = self.stack.split_off(self.stack.len() - count);
                    self.stack.push(Value::Tuple(items));
                }
                b'l' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::List(items));
                }
                b'd' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Value::Dict(pairs(items)?));
                }
                b'a' => {
                    let item = self.pop()?;
                    match self.stack.last_mut() {
                        Some(Value::List(list)) => list.push(item),
                        _ => return Err(err("APPEND target is not a list".to_string())),
                    }
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    match self.stack.last_mut() {
                        Some(Value::List(list)) => list.extend(items),
                        _ => return Err(err("APPENDS target is not a list".to_string())),
                    }
                }
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.stack.last_mut() {
                        Some(Value::Dict(dict)) => dict.push((key, value)),
                        _ => return Err(err("SETITEM target is not a dict".to_string())),
                    }
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    let entries = pairs(items)?;
                    match self.stack.last_mut() {
                        Some(Value::Dict(dict)) => dict.extend(entries),
                        _ => return Err(err("SETITEMS target is not a dict".to_string())),
                    }
                }
                b'q' => {
                    let index = u32::from(self.read_u8()?);
                    self.memoize(index)?;
                }
                b'r' => {
                    let index = u32::from_le_bytes(self.take_array::<4>()?);
                    self.memoize(index)?;
                }
                0x94 => {
                    let index = u32::try_from(self.memo.len())
                        .map_err(|_| err("memo overflow".to_string()))?;
                    self.memoize(index)?;
                }
                b'p' => {
                    let index = self.read_line_index()?;
                    self.memoize(index)?;
                }
                b'h' => {
                    let index = u32::from(self.read_u8()?);
                    self.recall(index)?;
                }
                b'j' => {
                    let index = u32::from_le_bytes(self.take_array::<4>()?);
                    self.recall(index)?;
                }
                b'g' => {
                    let index = self.read_line_index()?;
                    self.recall(index)?;
                }
                b'c' => {
                    let module = self.read_line()?;
                    let name = self.read_line()?;
                    self.stack.push(Value::Global { module, name });
                }
                0x93 => {
                    let name = self.pop()?.as_text();
                    let module = self.pop()?.as_text();
                    match (module, name) {
                        (Some(module), Some(name)) => {
                            self.stack.push(Value::Global { module, name })
                        }
                        _ => return Err(err("STACK_GLOBAL expects strings".to_string())),
                    }
                }
                b'R' | 0x81 => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(Value::Object {
                        callable: Box::new(callable),
                        args: Box::new(args),
                        state: None,
                    });
                }
                b'b' => {
                    let new_state = self.pop()?;
                    match self.stack.last_mut() {
                        Some(Value::Object { state, .. }) => *state = Some(Box::new(new_state)),
                        Some(Value::Dict(dict)) => {
                            if let Value::Dict(entries) = new_state {
                                dict.extend(entries);
                            }
                        }
                        _ => return Err(err("BUILD target is not an object".to_string())),
                    }
                }
                other => {
                    return Err(err(format!(
                        "unsupported opcode 0x{other:02x} at offset {}",
                        self.pos - 1
                    )));
                }
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8, IngestError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], IngestError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| err(format!("truncated stream at offset {}", self.pos)))?;
        let data = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], IngestError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_utf8(&mut self, len: usize) -> Result<String, IngestError> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| err("invalid utf-8 string".to_string()))
    }

    fn read_u32_len(&mut self) -> Result<usize, IngestError> {
        let len = u32::from_le_bytes(self.take_array::<4>()?);
        usize::try_from(len).map_err(|_| err("length overflow".to_string()))
    }

    fn read_u64_len(&mut self) -> Result<usize, IngestError> {
        let len = u64::from_le_bytes(self.take_array::<8>()?);
        usize::try_from(len).map_err(|_| err("length overflow".to_string()))
    }

    fn read_line(&mut self) -> Result<String, IngestError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| err("unterminated line".to_string()))?;
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(line)
    }

    fn read_line_index(&mut self) -> Result<u32, IngestError> {
        let line = self.read_line()?;
        line.trim()
            .parse()
            .map_err(|_| err(format!("bad memo index {line}")))
    }

    fn pop(&mut self) -> Result<Value, IngestError> {
        if self.marks.last().is_some_and(|mark| *mark >= self.stack.len()) {
            return Err(err("pop across mark".to_string()));
        }
        self.stack
            .pop()
            .ok_or_else(|| err("stack underflow".to_string()))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, IngestError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| err("missing mark".to_string()))?;
        if mark > self.stack.len() {
            return Err(err("mark beyond stack".to_string()));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memoize(&mut self, index: u32) -> Result<(), IngestError> {
        let top = self
            .stack
            .last()
            .ok_or_else(|| err("memoize on empty stack".to_string()))?;
        self.memo.insert(index, top.clone());
        Ok(())
    }

    fn recall(&mut self, index: u32) -> Result<(), IngestError> {
        let value = self
            .memo
            .get(&index)
            .cloned()
            .ok_or_else(|| err(format!("unknown memo index {index}")))?;
        self.stack.push(value);
        Ok(())
    }
}

fn pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>, IngestError> {
    if items.len() % 2 != 0 {
        return Err(err("odd number of dict items".to_string()));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        out.push((key, value));
    }
    Ok(out)
}

fn decode_long(raw: &[u8]) -> Result<i64, IngestError> {
    if raw.is_empty() {
        return Ok(0);
    }
    if raw.len() > 8 {
        return Err(err("LONG1 value exceeds 64 bits".to_string()));
    }
    let negative = raw[raw.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..raw.len()].copy_from_slice(raw);
    Ok(i64::from_le_bytes(buf))
}

fn err(message: String) -> IngestError {
    IngestError::Pickle(message)
}
