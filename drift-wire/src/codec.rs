// Frame a PeerMessage as a u32 big-endian length prefix followed by its
// MessagePack encoding. This is the one place this workspace talks about
// "bytes on the wire"; everything above this layer only ever sees whole
// PeerMessage values; sub-message framing below this layer is treated as
// an external collaborator, not reinvented here.

use std::io::{self, Read, Write};

use drift_base::{err, Result};

use crate::PeerMessage;

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub fn write_frame<W: Write>(writer: &mut W, message: &PeerMessage) -> Result<()> {
    let payload = rmp_serde::to_vec(message)?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| err("peer message too large to frame"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<PeerMessage>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(err(format!("peer message frame too large: {len} bytes")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    let message = rmp_serde::from_slice(&payload)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_message() {
        let msg = PeerMessage::Test { text: "Florin".to_string() };
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_several_messages_back_to_back() {
        let messages = vec![
            PeerMessage::Hello { peer_id: crate::PeerId::new("1.2.3.4", 1), interpreter_type: "toy".into() },
            PeerMessage::Test { text: "Guilder".to_string() },
            PeerMessage::Goodbye,
        ];
        let mut buf = Vec::new();
        for m in &messages {
            write_frame(&mut buf, m).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        for m in &messages {
            let decoded = read_frame(&mut cursor).unwrap().unwrap();
            assert_eq!(&decoded, m);
        }
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn empty_stream_yields_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }
}
