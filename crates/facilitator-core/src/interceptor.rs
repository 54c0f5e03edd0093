//! Raw datagram interception.
//!
//! An interceptor sees every datagram before protocol processing and after
//! encoding. Production uses include logging and lightweight obfuscation; the
//! test suites use it to inject faults such as severed peer-to-peer paths.

use std::net::SocketAddr;

/// Hook invoked on every raw datagram crossing the socket boundary.
pub trait Interceptor: Send {
    /// Called for a received datagram before protocol processing.
    /// Returning false drops the datagram.
    fn on_receive(&mut self, addr: &SocketAddr, data: &mut [u8]) -> bool;

    /// Called for an encoded datagram before it is sent.
    /// Returning false drops the datagram.
    fn on_send(&mut self, addr: &SocketAddr, data: &mut Vec<u8>) -> bool;
}

/// Default interceptor that passes every datagram through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct NoOpInterceptor;

impl Interceptor for NoOpInterceptor {
    fn on_receive(&mut self, _addr: &SocketAddr, _data: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        true
    }
}
