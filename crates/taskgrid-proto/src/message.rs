//! Message variants and the dual-shape codec.

use rmpv::Value;

use crate::error::ProtoError;

/// Messages exchanged between the orchestrator and workers.
///
/// Field order matters: the positional-array encoding of each variant
/// carries the fields in exactly the order declared here.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Worker announces readiness and its fixed resource capability.
    WorkerReady {
        worker_id: String,
        pid: u32,
        cpus: f64,
        gpus: f64,
        memory_gb: f64,
    },

    /// Orchestrator hands a task to a worker.
    TaskAssignment {
        task_id: String,
        function_name: String,
        /// Opaque msgpack argument map; decoded only by the worker.
        args: Value,
    },

    /// Worker reports task completion or failure.
    TaskResult {
        task_id: String,
        success: bool,
        /// Result payload on success, error payload on failure.
        result: Value,
    },

    /// Liveness signal, sent in both directions.
    Heartbeat { worker_id: String },

    /// Orchestrator requests worker shutdown.
    Shutdown { graceful: bool },
}

impl Message {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Message::WorkerReady { .. } => "WorkerReady",
            Message::TaskAssignment { .. } => "TaskAssignment",
            Message::TaskResult { .. } => "TaskResult",
            Message::Heartbeat { .. } => "Heartbeat",
            Message::Shutdown { .. } => "Shutdown",
        }
    }

    /// Serialize to msgpack bytes (without the length prefix).
    ///
    /// This side always emits the field-name map shape; peers are free
    /// to emit the positional shape instead.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let fields = match self {
            Message::WorkerReady {
                worker_id,
                pid,
                cpus,
                gpus,
                memory_gb,
            } => vec![
                field("worker_id", Value::from(worker_id.as_str())),
                field("pid", Value::from(*pid)),
                field("cpus", Value::F64(*cpus)),
                field("gpus", Value::F64(*gpus)),
                field("memory_gb", Value::F64(*memory_gb)),
            ],
            Message::TaskAssignment {
                task_id,
                function_name,
                args,
            } => vec![
                field("task_id", Value::from(task_id.as_str())),
                field("function_name", Value::from(function_name.as_str())),
                field("args", args.clone()),
            ],
            Message::TaskResult {
                task_id,
                success,
                result,
            } => vec![
                field("task_id", Value::from(task_id.as_str())),
                field("success", Value::Boolean(*success)),
                field("result", result.clone()),
            ],
            Message::Heartbeat { worker_id } => {
                vec![field("worker_id", Value::from(worker_id.as_str()))]
            }
            Message::Shutdown { graceful } => {
                vec![field("graceful", Value::Boolean(*graceful))]
            }
        };

        let envelope = Value::Map(vec![(
            Value::from(self.variant_name()),
            Value::Map(fields),
        )]);

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope)?;
        Ok(buf)
    }

    /// Deserialize from msgpack bytes (without the length prefix).
    ///
    /// Accepts both payload shapes: `{Variant: {field: value, …}}` and
    /// `{Variant: [value, …]}` with fields in declared order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut cursor = bytes;
        let envelope = rmpv::decode::read_value(&mut cursor)?;

        let Value::Map(entries) = envelope else {
            return Err(ProtoError::Malformed(
                "payload is not a map".to_string(),
            ));
        };
        if entries.len() != 1 {
            return Err(ProtoError::Malformed(format!(
                "expected single-key envelope, got {} keys",
                entries.len()
            )));
        }

        let (key, body) = &entries[0];
        let variant = key
            .as_str()
            .ok_or_else(|| ProtoError::Malformed("variant key is not a string".to_string()))?;

        let fields = FieldReader::new(variant, body)?;
        match variant {
            "WorkerReady" => Ok(Message::WorkerReady {
                worker_id: fields.string("worker_id", 0)?,
                pid: fields.uint("pid", 1)? as u32,
                cpus: fields.float("cpus", 2)?,
                gpus: fields.float("gpus", 3)?,
                memory_gb: fields.float("memory_gb", 4)?,
            }),
            "TaskAssignment" => Ok(Message::TaskAssignment {
                task_id: fields.string("task_id", 0)?,
                function_name: fields.string("function_name", 1)?,
                args: fields.value("args", 2)?,
            }),
            "TaskResult" => Ok(Message::TaskResult {
                task_id: fields.string("task_id", 0)?,
                success: fields.boolean("success", 1)?,
                result: fields.value("result", 2)?,
            }),
            "Heartbeat" => Ok(Message::Heartbeat {
                worker_id: fields.string("worker_id", 0)?,
            }),
            "Shutdown" => Ok(Message::Shutdown {
                graceful: fields.boolean("graceful", 0)?,
            }),
            other => Err(ProtoError::UnknownVariant(other.to_string())),
        }
    }
}

fn field(name: &str, value: Value) -> (Value, Value) {
    (Value::from(name), value)
}

/// Reads a variant body in either shape, addressing fields by name (map
/// form) or declared position (array form).
enum FieldReader<'a> {
    Named(&'a [(Value, Value)]),
    Positional(&'a [Value]),
}

impl<'a> FieldReader<'a> {
    fn new(variant: &str, body: &'a Value) -> Result<Self, ProtoError> {
        match body {
            Value::Map(entries) => Ok(FieldReader::Named(entries)),
            Value::Array(items) => Ok(FieldReader::Positional(items)),
            _ => Err(ProtoError::Malformed(format!(
                "{variant} body must be a map or array"
            ))),
        }
    }

    fn get(&self, name: &str, index: usize) -> Result<&'a Value, ProtoError> {
        match self {
            FieldReader::Named(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v)
                .ok_or_else(|| ProtoError::Malformed(format!("missing field {name:?}"))),
            FieldReader::Positional(items) => items
                .get(index)
                .ok_or_else(|| ProtoError::Malformed(format!("missing field {name:?} at {index}"))),
        }
    }

    fn string(&self, name: &str, index: usize) -> Result<String, ProtoError> {
        let value = self.get(name, index)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProtoError::Malformed(format!("field {name:?} is not a string")))
    }

    fn uint(&self, name: &str, index: usize) -> Result<u64, ProtoError> {
        let value = self.get(name, index)?;
        value
            .as_u64()
            .ok_or_else(|| ProtoError::Malformed(format!("field {name:?} is not an integer")))
    }

    /// Floats may arrive as msgpack integers when a sender had a whole
    /// number in hand; accept both.
    fn float(&self, name: &str, index: usize) -> Result<f64, ProtoError> {
        let value = self.get(name, index)?;
        match value {
            Value::F32(f) => Ok(f64::from(*f)),
            Value::F64(f) => Ok(*f),
            Value::Integer(i) => i
                .as_f64()
                .ok_or_else(|| ProtoError::Malformed(format!("field {name:?} out of range"))),
            _ => Err(ProtoError::Malformed(format!(
                "field {name:?} is not a number"
            ))),
        }
    }

    fn boolean(&self, name: &str, index: usize) -> Result<bool, ProtoError> {
        let value = self.get(name, index)?;
        value
            .as_bool()
            .ok_or_else(|| ProtoError::Malformed(format!("field {name:?} is not a boolean")))
    }

    fn value(&self, name: &str, index: usize) -> Result<Value, ProtoError> {
        Ok(self.get(name, index)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Message) -> Message {
        let bytes = msg.to_bytes().unwrap();
        Message::from_bytes(&bytes).unwrap()
    }

    /// Build the positional-array shape for a variant by hand, the way
    /// a position-encoding sender would.
    fn positional(variant: &str, fields: Vec<Value>) -> Vec<u8> {
        let envelope = Value::Map(vec![(Value::from(variant), Value::Array(fields))]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope).unwrap();
        buf
    }

    #[test]
    fn worker_ready_roundtrip() {
        let msg = Message::WorkerReady {
            worker_id: "gpu-0".to_string(),
            pid: 4242,
            cpus: 4.0,
            gpus: 1.0,
            memory_gb: 32.0,
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn task_assignment_roundtrip() {
        let msg = Message::TaskAssignment {
            task_id: "t-1".to_string(),
            function_name: "infer".to_string(),
            args: Value::Map(vec![(Value::from("prompt"), Value::from("hello"))]),
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn task_result_roundtrip() {
        let msg = Message::TaskResult {
            task_id: "t-1".to_string(),
            success: false,
            result: Value::from("ValueError: bad input"),
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn heartbeat_and_shutdown_roundtrip() {
        let hb = Message::Heartbeat {
            worker_id: "cpu-1".to_string(),
        };
        assert_eq!(roundtrip(&hb), hb);

        let down = Message::Shutdown { graceful: true };
        assert_eq!(roundtrip(&down), down);
    }

    #[test]
    fn positional_worker_ready_decodes_identically() {
        let bytes = positional(
            "WorkerReady",
            vec![
                Value::from("gpu-0"),
                Value::from(4242u32),
                Value::F64(4.0),
                Value::F64(1.0),
                Value::F64(32.0),
            ],
        );

        let expected = Message::WorkerReady {
            worker_id: "gpu-0".to_string(),
            pid: 4242,
            cpus: 4.0,
            gpus: 1.0,
            memory_gb: 32.0,
        };
        assert_eq!(Message::from_bytes(&bytes).unwrap(), expected);

        // Same logical message in map form decodes to the same value.
        assert_eq!(Message::from_bytes(&expected.to_bytes().unwrap()).unwrap(), expected);
    }

    #[test]
    fn positional_task_result_decodes_identically() {
        let bytes = positional(
            "TaskResult",
            vec![
                Value::from("t-9"),
                Value::Boolean(true),
                Value::Map(vec![(Value::from("answer"), Value::from(42u32))]),
            ],
        );

        let expected = Message::TaskResult {
            task_id: "t-9".to_string(),
            success: true,
            result: Value::Map(vec![(Value::from("answer"), Value::from(42u32))]),
        };
        assert_eq!(Message::from_bytes(&bytes).unwrap(), expected);
    }

    #[test]
    fn positional_every_variant() {
        let cases = vec![
            (
                positional("Heartbeat", vec![Value::from("w-1")]),
                Message::Heartbeat {
                    worker_id: "w-1".to_string(),
                },
            ),
            (
                positional("Shutdown", vec![Value::Boolean(false)]),
                Message::Shutdown { graceful: false },
            ),
            (
                positional(
                    "TaskAssignment",
                    vec![Value::from("t-2"), Value::from("echo"), Value::Nil],
                ),
                Message::TaskAssignment {
                    task_id: "t-2".to_string(),
                    function_name: "echo".to_string(),
                    args: Value::Nil,
                },
            ),
        ];

        for (bytes, expected) in cases {
            assert_eq!(Message::from_bytes(&bytes).unwrap(), expected);
        }
    }

    #[test]
    fn integer_capability_accepted_as_float() {
        // A sender with whole-number capabilities may encode them as
        // msgpack integers rather than floats.
        let bytes = positional(
            "WorkerReady",
            vec![
                Value::from("cpu-0"),
                Value::from(100u32),
                Value::from(8u32),
                Value::from(0u32),
                Value::from(32u32),
            ],
        );

        match Message::from_bytes(&bytes).unwrap() {
            Message::WorkerReady {
                cpus,
                gpus,
                memory_gb,
                ..
            } => {
                assert_eq!(cpus, 8.0);
                assert_eq!(gpus, 0.0);
                assert_eq!(memory_gb, 32.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_variant_rejected() {
        let bytes = positional("SelfDestruct", vec![Value::Boolean(true)]);
        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(ProtoError::UnknownVariant(v)) if v == "SelfDestruct"
        ));
    }

    #[test]
    fn short_positional_body_rejected() {
        let bytes = positional("TaskResult", vec![Value::from("t-1")]);
        assert!(matches!(
            Message::from_bytes(&bytes),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn missing_named_field_rejected() {
        let envelope = Value::Map(vec![(
            Value::from("Heartbeat"),
            Value::Map(vec![(Value::from("nope"), Value::from("w-1"))]),
        )]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope).unwrap();

        assert!(matches!(
            Message::from_bytes(&buf),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn non_map_envelope_rejected() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::from("hello")).unwrap();
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn scalar_body_rejected() {
        let envelope = Value::Map(vec![(Value::from("Shutdown"), Value::Boolean(true))]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope).unwrap();
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(ProtoError::Malformed(_))
        ));
    }
}
