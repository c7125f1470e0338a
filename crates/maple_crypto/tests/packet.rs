use maple_crypto::{custom, next_iv, packet::packet_length, PacketCipher};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn seal(cipher: &mut PacketCipher, payload: &[u8]) -> Vec<u8> {
    let mut body = payload.to_vec();
    custom::encrypt(&mut body);
    let header = cipher.header_to_server(body.len());
    cipher.crypt(&mut body);

    let mut packet = header.to_vec();
    packet.extend_from_slice(&body);
    packet
}

fn open(cipher: &mut PacketCipher, packet: &[u8]) -> Option<Vec<u8>> {
    let header: [u8; 4] = packet.get(..4)?.try_into().ok()?;
    if !cipher.check_to_server(header) {
        return None;
    }

    let mut body = packet.get(4..4 + packet_length(header))?.to_vec();
    cipher.crypt(&mut body);
    custom::decrypt(&mut body);
    Some(body)
}

#[traced_test]
#[test]
fn client_to_server_sequence() {
    let iv = [0x46, 0x72, 0x7A, 0xD3];
    let mut client = PacketCipher::new(iv, 83);
    let mut server = PacketCipher::new(iv, 83);

    for payload in [&b"\x01\x00login"[..], b"", &[0xFFu8; 2000][..]] {
        let packet = seal(&mut client, payload);
        assert_eq!(open(&mut server, &packet).as_deref(), Some(payload));
    }

    assert_eq!(client.iv(), next_iv(next_iv(next_iv(iv))));
    assert_eq!(client.iv(), server.iv());
}

#[traced_test]
#[test]
fn header_for_wrong_version_is_rejected() {
    let iv = [0x46, 0x72, 0x7A, 0xD3];
    let mut client = PacketCipher::new(iv, 83);
    let mut server = PacketCipher::new(iv, 95);

    let packet = seal(&mut client, b"ping");
    assert_eq!(open(&mut server, &packet), None);
}
