//! Encapsulation-aware payload conversion between the two sides of a stream

use bytes::Bytes;
use tapline_external_media::Encapsulation;

use crate::error::{Result, StreamError};

/// Convert bytes read from the switch socket into what the client expects
pub fn convert_from_switch(encapsulation: Encapsulation, data: Bytes) -> Result<Bytes> {
    match encapsulation {
        Encapsulation::AudioSocket => Ok(data),
        other => Err(StreamError::UnsupportedEncapsulation(other)),
    }
}

/// Convert bytes received from the client into what the switch expects
pub fn convert_from_client(encapsulation: Encapsulation, data: Bytes) -> Result<Bytes> {
    match encapsulation {
        Encapsulation::AudioSocket => Ok(data),
        other => Err(StreamError::UnsupportedEncapsulation(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audiosocket_passes_through() {
        let data = Bytes::from_static(&[0x10, 0x02, 0x00, 0xaa, 0xbb]);
        assert_eq!(convert_from_switch(Encapsulation::AudioSocket, data.clone()).unwrap(), data);
        assert_eq!(convert_from_client(Encapsulation::AudioSocket, data.clone()).unwrap(), data);
    }

    #[test]
    fn test_other_encapsulations_are_unsupported() {
        for encapsulation in [Encapsulation::Rtp, Encapsulation::Sln] {
            assert!(matches!(
                convert_from_switch(encapsulation, Bytes::new()),
                Err(StreamError::UnsupportedEncapsulation(e)) if e == encapsulation
            ));
            assert!(matches!(
                convert_from_client(encapsulation, Bytes::new()),
                Err(StreamError::UnsupportedEncapsulation(_))
            ));
        }
    }
}
