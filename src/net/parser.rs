use std::{iter::Peekable, str::Chars};

use super::{Host, ParseHostError, Result};

/// Parser for seed host strings of the form
/// `hostname[:tls-name][:port][,...]`.
pub(crate) struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    default_port: u16,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(s: &'a str, default_port: u16) -> Self {
        Parser {
            chars: s.chars().peekable(),
            default_port,
        }
    }

    pub(crate) fn read_hosts(&mut self) -> Result<Vec<Host>, ParseHostError> {
        let mut hosts = Vec::new();
        loop {
            let addr = self.read_addr_tuple()?;
            let (name, tls_name, port) = match addr.len() {
                3 => (
                    addr[0].clone(),
                    Some(addr[1].clone()),
                    addr[2].parse().map_err(ParseHostError::PortNumber)?,
                ),
                2 => {
                    if let Ok(port) = addr[1].parse() {
                        (addr[0].clone(), None, port)
                    } else {
                        (addr[0].clone(), Some(addr[1].clone()), self.default_port)
                    }
                }
                1 => (addr[0].clone(), None, self.default_port),
                _ => return Err(ParseHostError::InvalidArgument),
            };

            hosts.push(Host {
                name,
                port,
                tls_name,
            });

            match self.chars.peek() {
                Some(',') => self.chars.next(),
                _ => break,
            };
        }

        Ok(hosts)
    }

    fn read_addr_tuple(&mut self) -> Result<Vec<String>, ParseHostError> {
        let mut parts = Vec::new();
        loop {
            parts.push(self.read_addr_part()?);
            match self.chars.peek() {
                Some(':') => self.chars.next(),
                _ => break,
            };
        }
        Ok(parts)
    }

    fn read_addr_part(&mut self) -> Result<String, ParseHostError> {
        let mut substr = String::new();
        loop {
            match self.chars.peek() {
                Some(&c) if c != ':' && c != ',' => {
                    substr.push(c);
                    self.chars.next();
                }
                _ => {
                    return if substr.is_empty() {
                        Err(ParseHostError::InvalidArgument)
                    } else {
                        Ok(substr)
                    }
                }
            }
        }
    }
}
