use bincode::Options;
use ledger_types::Block;

use crate::domain::errors::CodecError;
use crate::ports::outbound::BlockSerializer;

/// Default block serializer using bincode.
///
/// Fixed-width integers, no trailing bytes, and a size limit equal to the
/// input length so a garbage length field can never trigger a large
/// allocation while scanning a torn tail.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeBlockSerializer;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl BlockSerializer for BincodeBlockSerializer {
    fn serialize(&self, block: &Block) -> Result<Vec<u8>, CodecError> {
        options().serialize(block).map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })
    }

    fn deserialize(&self, data: &[u8]) -> Result<Block, CodecError> {
        options()
            .with_limit(data.len() as u64)
            .deserialize(data)
            .map_err(|e| CodecError::Decode {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::Envelope;

    #[test]
    fn test_rejects_trailing_bytes() {
        let block = Block::new(1, Vec::new(), vec![Envelope::new("t", vec![1])]);
        let mut bytes = BincodeBlockSerializer.serialize(&block).unwrap();
        assert_eq!(BincodeBlockSerializer.deserialize(&bytes).unwrap(), block);

        bytes.push(0);
        assert!(BincodeBlockSerializer.deserialize(&bytes).is_err());
    }

    #[test]
    fn test_huge_length_field_is_rejected() {
        // number, then a hash length of u64::MAX
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            BincodeBlockSerializer.deserialize(&bytes),
            Err(CodecError::Decode { .. })
        ));
    }
}
