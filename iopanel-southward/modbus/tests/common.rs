#![allow(dead_code)]

use std::{
    collections::HashMap,
    future,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};
use tracing::Level;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// Request as seen by the test server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Read { address: u16, count: u16 },
    Write { address: u16, value: u16 },
}

/// Holding register bank shared between the server and the test body.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl RegisterBank {
    pub fn with_values(start: u16, values: &[u16]) -> Self {
        let bank = Self::default();
        {
            let mut regs = bank.registers.lock().unwrap();
            for (offset, value) in (0u16..).zip(values) {
                regs.insert(start + offset, *value);
            }
        }
        bank
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers.lock().unwrap().get(&address).copied()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

struct PanelService {
    bank: RegisterBank,
}

impl tokio_modbus::server::Service for PanelService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                self.bank.requests.lock().unwrap().push(Recorded::Read {
                    address: addr,
                    count: cnt,
                });
                let regs = self.bank.registers.lock().unwrap();
                // Unmapped addresses are rejected like a real device would
                (0..cnt)
                    .map(|i| {
                        addr.checked_add(i)
                            .and_then(|a| regs.get(&a).copied())
                            .ok_or(ExceptionCode::IllegalDataAddress)
                    })
                    .collect::<Result<Vec<u16>, _>>()
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteSingleRegister(addr, value) => {
                self.bank.requests.lock().unwrap().push(Recorded::Write {
                    address: addr,
                    value,
                });
                let mut regs = self.bank.registers.lock().unwrap();
                match regs.get_mut(&addr) {
                    Some(slot) => {
                        *slot = value;
                        Ok(Response::WriteSingleRegister(addr, value))
                    }
                    None => Err(ExceptionCode::IllegalDataAddress),
                }
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

/// Start an in-process Modbus TCP server on an OS-assigned port.
pub async fn start_test_server(bank: RegisterBank) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(listener);

    let handle = tokio::spawn(async move {
        let new_service = move |_socket_addr| {
            Ok(Some(PanelService {
                bank: bank.clone(),
            }))
        };
        let on_connected = move |stream, socket_addr| {
            let new_service = new_service.clone();
            async move { accept_tcp_connection(stream, socket_addr, new_service) }
        };
        let on_process_error = |err| {
            tracing::warn!("Test server error: {err}");
        };
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            tracing::warn!("Test server stopped: {e}");
        }
    });

    (addr, handle)
}

/// Twelve channel registers with channels 0 and 2 ON and channel 1 OFF.
pub fn panel_registers() -> Vec<u16> {
    let mut regs = vec![0u16; 12];
    regs[0] = 0x100;
    regs[1] = 0x200;
    regs[2] = 0x100;
    regs
}
