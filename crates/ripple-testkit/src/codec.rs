//! `serde_json` 后端的编解码实现，供 `encode`/`decode` 算子测试使用。

use ripple_core::codec::{Decoder, Encoder};
use ripple_core::error::BoxError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON 编解码器：编码产出 `Vec<u8>`，解码消费 `Vec<u8>`。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<T> Encoder<T> for JsonCodec
where
    T: Serialize,
{
    type Output = Vec<u8>;

    fn encode(&self, value: &T) -> Result<Vec<u8>, BoxError> {
        serde_json::to_vec(value).map_err(Into::into)
    }
}

impl<T> Decoder<T> for JsonCodec
where
    T: DeserializeOwned,
{
    type Input = Vec<u8>;

    fn decode(&self, input: &Vec<u8>) -> Result<T, BoxError> {
        serde_json::from_slice(input).map_err(Into::into)
    }
}
