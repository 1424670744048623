//! Loopback fake controller for connector and driver tests

use crate::connector::{GET_JOINT_POSITION, GET_TOOL_FRAME};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const TOOL_FRAME_REPLY: &str = "300 -600 365 0 0 1 0";
pub(crate) const DEFAULT_REPLY: &str = "done";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Side {
    Action,
    Query,
}

#[derive(Default)]
struct Recorded {
    lines: Vec<(Side, String)>,
    joint_replies: VecDeque<String>,
}

/// Answers every line on `port` (action) and `port + 1` (query)
///
/// `get joint position` is answered from the scripted replies, the last one
/// repeating; `get tool frame` gets a fixed pose; everything else `done`.
pub(crate) struct FakeController {
    pub port: u16,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeController {
    pub fn start(joint_replies: Vec<&str>) -> Self {
        let (action, query) = bind_pair();
        let port = action.local_addr().unwrap().port();
        let recorded = Arc::new(Mutex::new(Recorded {
            lines: Vec::new(),
            joint_replies: joint_replies.into_iter().map(String::from).collect(),
        }));

        serve(action, Side::Action, Arc::clone(&recorded));
        serve(query, Side::Query, Arc::clone(&recorded));

        Self { port, recorded }
    }

    /// A port with nothing listening on it
    pub fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    pub fn action_lines(&self) -> Vec<String> {
        self.lines(Side::Action)
    }

    pub fn query_lines(&self) -> Vec<String> {
        self.lines(Side::Query)
    }

    fn lines(&self, side: Side) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap()
            .lines
            .iter()
            .filter(|(s, _)| *s == side)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

/// Listeners on `port` and `port + 1` that hang up on every connection
pub(crate) fn hang_up_controller() -> u16 {
    let (action, query) = bind_pair();
    let port = action.local_addr().unwrap().port();
    for listener in [action, query] {
        thread::spawn(move || {
            for stream in listener.incoming() {
                drop(stream);
            }
        });
    }
    port
}

fn bind_pair() -> (TcpListener, TcpListener) {
    for _ in 0..100 {
        let first = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = first.local_addr().unwrap().port();
        if port == u16::MAX {
            continue;
        }
        if let Ok(second) = TcpListener::bind(("127.0.0.1", port + 1)) {
            return (first, second);
        }
    }
    panic!("no adjacent free port pair on loopback");
}

fn serve(listener: TcpListener, side: Side, recorded: Arc<Mutex<Recorded>>) {
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let recorded = Arc::clone(&recorded);
            thread::spawn(move || handle(stream, side, recorded));
        }
    });
}

fn handle(stream: TcpStream, side: Side, recorded: Arc<Mutex<Recorded>>) {
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let reply = {
            let mut rec = recorded.lock().unwrap();
            rec.lines.push((side, line.clone()));
            match line.as_str() {
                GET_JOINT_POSITION => {
                    if rec.joint_replies.len() > 1 {
                        rec.joint_replies.pop_front().unwrap_or_default()
                    } else {
                        rec.joint_replies.front().cloned().unwrap_or_default()
                    }
                }
                GET_TOOL_FRAME => TOOL_FRAME_REPLY.to_string(),
                _ => DEFAULT_REPLY.to_string(),
            }
        };
        if writer.write_all(format!("{}\n", reply).as_bytes()).is_err() {
            break;
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
