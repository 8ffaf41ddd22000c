//! Registration handshake tests
//!
//! Drive the dispatcher's packet router directly with client datagrams and
//! observe the replies on real UDP sockets.

use srtla_core::Dispatcher;
use srtla_io::now_secs;
use srtla_protocol::SRTLA_ID_LEN;
use srtla_tests::*;
use std::net::UdpSocket;

fn dispatcher() -> Dispatcher {
    // The downstream target only matters once data flows; these tests
    // never forward any
    Dispatcher::new(0, "127.0.0.1:4001".parse().unwrap()).unwrap()
}

#[test]
fn test_reg1_yields_reg2_with_client_nonce() {
    let mut d = dispatcher();
    let client = client_sock();
    let nonce: [u8; 16] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F, 0x10,
    ];

    d.process_datagram(sock_addr(&client), &build_reg1(&nonce), now_secs());

    let reply = recv_pkt(&client).expect("REG2 reply");
    assert_eq!(reply.len(), 34);
    assert_eq!(&reply[..2], &[0x92, 0x01]);
    assert_eq!(&reply[2..18], &nonce);

    assert_eq!(d.group_count(), 1);
    assert_eq!(&d.registry().group(0).id[..16], &nonce);
}

#[test]
fn test_two_link_registration() {
    let mut d = dispatcher();
    let link_a = client_sock();
    let link_b = client_sock();
    let now = now_secs();

    d.process_datagram(sock_addr(&link_a), &build_reg1(&[7u8; 16]), now);
    let reg2 = recv_pkt(&link_a).expect("REG2 reply");

    // Both uplinks join with the full id from the REG2 reply
    d.process_datagram(sock_addr(&link_a), &build_client_reg2(&reg2[2..]), now);
    assert_eq!(recv_pkt(&link_a).expect("REG3 for link A"), vec![0x92, 0x02]);

    d.process_datagram(sock_addr(&link_b), &build_client_reg2(&reg2[2..]), now);
    assert_eq!(recv_pkt(&link_b).expect("REG3 for link B"), vec![0x92, 0x02]);

    assert_eq!(d.group_count(), 1);
    assert_eq!(d.registry().group(0).conns.len(), 2);
    assert_eq!(
        d.registry().group(0).conns[0].peer_addr,
        sock_addr(&link_a)
    );
    assert_eq!(
        d.registry().group(0).conns[1].peer_addr,
        sock_addr(&link_b)
    );
}

#[test]
fn test_duplicate_reg1_from_bound_address_rejected() {
    let mut d = dispatcher();
    let client = client_sock();
    let now = now_secs();

    d.process_datagram(sock_addr(&client), &build_reg1(&[1u8; 16]), now);
    assert_eq!(recv_pkt(&client).unwrap().len(), 34);

    // The address already owns a group: REG_ERR, no second group
    d.process_datagram(sock_addr(&client), &build_reg1(&[2u8; 16]), now);
    assert_eq!(recv_pkt(&client).expect("REG_ERR"), vec![0x92, 0x10]);
    assert_eq!(d.group_count(), 1);
}

#[test]
fn test_reg2_with_unknown_id_gets_ngp() {
    let mut d = dispatcher();
    let client = client_sock();

    let bogus = [0x55u8; SRTLA_ID_LEN];
    d.process_datagram(sock_addr(&client), &build_client_reg2(&bogus), now_secs());
    assert_eq!(recv_pkt(&client).expect("REG_NGP"), vec![0x92, 0x11]);
}

#[test]
fn test_reg2_to_foreign_group_rejected() {
    let mut d = dispatcher();
    let client_a = client_sock();
    let client_b = client_sock();
    let now = now_secs();

    d.process_datagram(sock_addr(&client_a), &build_reg1(&[1u8; 16]), now);
    let reg2_a = recv_pkt(&client_a).unwrap();
    d.process_datagram(sock_addr(&client_a), &build_client_reg2(&reg2_a[2..]), now);
    assert_eq!(recv_pkt(&client_a).unwrap(), vec![0x92, 0x02]);

    d.process_datagram(sock_addr(&client_b), &build_reg1(&[2u8; 16]), now);
    let reg2_b = recv_pkt(&client_b).unwrap();

    // A's address may not attach to B's group
    d.process_datagram(sock_addr(&client_a), &build_client_reg2(&reg2_b[2..]), now);
    assert_eq!(recv_pkt(&client_a).expect("REG_ERR"), vec![0x92, 0x10]);
    assert_eq!(d.registry().group(1).conns.len(), 0);
}

#[test]
fn test_reregistration_is_idempotent() {
    let mut d = dispatcher();
    let client = client_sock();
    let now = now_secs();

    d.process_datagram(sock_addr(&client), &build_reg1(&[9u8; 16]), now);
    let reg2 = recv_pkt(&client).unwrap();

    d.process_datagram(sock_addr(&client), &build_client_reg2(&reg2[2..]), now);
    assert_eq!(recv_pkt(&client).unwrap(), vec![0x92, 0x02]);

    d.process_datagram(sock_addr(&client), &build_client_reg2(&reg2[2..]), now);
    assert_eq!(recv_pkt(&client).unwrap(), vec![0x92, 0x02]);

    assert_eq!(d.registry().group(0).conns.len(), 1);
}

#[test]
fn test_group_conn_cap_enforced() {
    let mut d = dispatcher();
    let owner = client_sock();
    let now = now_secs();

    d.process_datagram(sock_addr(&owner), &build_reg1(&[3u8; 16]), now);
    let reg2 = recv_pkt(&owner).unwrap();

    let links: Vec<UdpSocket> = (0..16).map(|_| client_sock()).collect();
    for link in &links {
        d.process_datagram(sock_addr(link), &build_client_reg2(&reg2[2..]), now);
        assert_eq!(recv_pkt(link).expect("REG3"), vec![0x92, 0x02]);
    }
    assert_eq!(d.registry().group(0).conns.len(), 16);

    let overflow = client_sock();
    d.process_datagram(sock_addr(&overflow), &build_client_reg2(&reg2[2..]), now);
    assert_eq!(recv_pkt(&overflow).expect("REG_ERR"), vec![0x92, 0x10]);
    assert_eq!(d.registry().group(0).conns.len(), 16);
}

#[test]
fn test_malformed_registration_packets_dropped() {
    let mut d = dispatcher();
    let client = client_sock();
    let now = now_secs();

    // Wrong-length REG1 and REG2 fall through to the data path, where an
    // unknown peer is silently discarded
    d.process_datagram(sock_addr(&client), &build_reg1(&[1u8; 16])[..33], now);
    d.process_datagram(sock_addr(&client), &[0x92, 0x01, 0x00], now);
    assert_silent(&client);
    assert_eq!(d.group_count(), 0);
}
