//! Wire codecs for service instance records
//!
//! Two mutually decodable encodings: a fixed-key JSON document (default)
//! and a compact bincode record. The decoder dispatches on the first two
//! bytes: `{"` selects JSON, anything else the binary form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

use super::{Endpoint, ServiceInstance, Status};

/// Which encoding a publisher writes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Json,
    Binary,
}

/// JSON document shape. Key order is fixed by field order; `shard` is
/// omitted entirely when absent.
#[derive(Serialize, Deserialize)]
struct JsonInstance {
    #[serde(rename = "serviceEndpoint")]
    service_endpoint: Endpoint,
    #[serde(rename = "additionalEndpoints")]
    additional_endpoints: BTreeMap<String, Endpoint>,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    shard: Option<u32>,
}

impl From<&ServiceInstance> for JsonInstance {
    fn from(instance: &ServiceInstance) -> JsonInstance {
        JsonInstance {
            service_endpoint: instance.service_endpoint.clone(),
            additional_endpoints: instance.additional_endpoints.clone(),
            status: instance.status,
            shard: instance.shard,
        }
    }
}

impl From<JsonInstance> for ServiceInstance {
    fn from(wire: JsonInstance) -> ServiceInstance {
        ServiceInstance {
            service_endpoint: wire.service_endpoint,
            additional_endpoints: wire.additional_endpoints,
            status: wire.status,
            shard: wire.shard,
        }
    }
}

/// Encoder for one configured encoding; decoding always auto-detects.
#[derive(Clone, Copy, Debug, Default)]
pub struct Codec {
    encoding: Encoding,
}

impl Codec {
    pub fn new(encoding: Encoding) -> Codec {
        Codec { encoding }
    }

    pub fn json() -> Codec {
        Codec::new(Encoding::Json)
    }

    pub fn binary() -> Codec {
        Codec::new(Encoding::Binary)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn encode(&self, instance: &ServiceInstance) -> Result<Vec<u8>, CodecError> {
        match self.encoding {
            Encoding::Json => Ok(serde_json::to_vec(&JsonInstance::from(instance))?),
            Encoding::Binary => Ok(bincode::serialize(instance)?),
        }
    }

    /// Decode either encoding, classified by the leading bytes.
    pub fn decode(data: &[u8]) -> Result<ServiceInstance, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::TooShort);
        }
        if data[0] == b'{' && data[1] == b'"' {
            let wire: JsonInstance = serde_json::from_slice(data)?;
            Ok(wire.into())
        } else {
            Ok(bincode::deserialize(data)?)
        }
    }
}
