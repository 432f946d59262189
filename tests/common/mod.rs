//! In-process RCON server for client tests.

#![allow(dead_code)]

use bytes::BytesMut;
use gso::rcon::{Packet, PacketType};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Behavior of the fake server.
#[derive(Clone)]
pub struct FakeRcon {
    pub password: String,
    /// Send an empty response packet before the auth reply
    pub empty_before_auth: bool,
    /// Reply to `list`
    pub list_reply: String,
    /// Reply to `tps`
    pub tps_reply: String,
    /// Never answer login requests
    pub ignore_auth: bool,
    /// Close the connection instead of answering login requests
    pub close_on_auth: bool,
}

impl Default for FakeRcon {
    fn default() -> Self {
        Self {
            password: "secret".to_string(),
            empty_before_auth: false,
            list_reply: "There are 3 of a max of 20 players online: alex, sam, kai".to_string(),
            tps_reply: "§6TPS from last 1m, 5m, 15m: §a19.8, §a19.9, §a20.0".to_string(),
            ignore_auth: false,
            close_on_auth: false,
        }
    }
}

/// Handle to a running fake server.
pub struct FakeServer {
    pub port: u16,
    pub connections: Arc<AtomicUsize>,
}

impl FakeRcon {
    /// Bind on an ephemeral port and serve connections in the background.
    pub async fn spawn(self) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let behavior = self.clone();
                tokio::spawn(async move {
                    let _ = behavior.serve(stream).await;
                });
            }
        });

        FakeServer { port, connections }
    }

    async fn serve(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            while let Some(packet) = Packet::decode(&mut buf).map_err(std::io::Error::other)? {
                match packet.kind {
                    PacketType::Auth if self.close_on_auth => return Ok(()),
                    PacketType::Auth if self.ignore_auth => {}
                    PacketType::Auth => {
                        if self.empty_before_auth {
                            write(&mut stream, Packet::new(packet.id, PacketType::Response, "")).await?;
                        }
                        let id = if packet.body == self.password { packet.id } else { -1 };
                        write(&mut stream, Packet::new(id, PacketType::ExecCommand, "")).await?;
                    }
                    _ => {
                        let reply = match packet.body.as_str() {
                            "list" => self.list_reply.clone(),
                            "tps" => self.tps_reply.clone(),
                            "slow" => {
                                tokio::time::sleep(Duration::from_millis(300)).await;
                                "done".to_string()
                            }
                            "stale" => {
                                write(
                                    &mut stream,
                                    Packet::new(packet.id + 1000, PacketType::Response, "other"),
                                )
                                .await?;
                                "fresh".to_string()
                            }
                            "quit" => return Ok(()),
                            "garbled" => {
                                // length below the header size, then junk
                                let mut frame = 3i32.to_le_bytes().to_vec();
                                frame.extend_from_slice(&[0xAB; 8]);
                                stream.write_all(&frame).await?;
                                continue;
                            }
                            "unterminated" => {
                                let mut frame = Packet::new(packet.id, PacketType::Response, "x")
                                    .encode()
                                    .to_vec();
                                let end = frame.len();
                                frame[end - 2] = 1;
                                frame[end - 1] = 1;
                                stream.write_all(&frame).await?;
                                continue;
                            }
                            other => format!("echo {}", other),
                        };
                        write(&mut stream, Packet::new(packet.id, PacketType::Response, reply)).await?;
                    }
                }
            }

            if stream.read_buf(&mut buf).await? == 0 {
                return Ok(());
            }
        }
    }
}

async fn write(stream: &mut TcpStream, packet: Packet) -> std::io::Result<()> {
    stream.write_all(&packet.encode()).await
}
