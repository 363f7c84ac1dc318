//! Client -> relay command frames.

use everelay_core::filter::Filter;
use everelay_core::{PublicKey, Seq};
use serde::Deserialize;
use snafu::Snafu;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[snafu(display("malformed: not a JSON value the transport understood"))]
    NotJson,
    #[snafu(display("malformed: expected a JSON array"))]
    NotAnArray,
    #[snafu(display("malformed: empty command array"))]
    EmptyArray,
    #[snafu(display("malformed: command tag must be a string"))]
    TagNotAString,
    #[snafu(display("malformed: unknown command `{tag}`"))]
    UnknownCommand { tag: String },
    #[snafu(display("malformed: `{command}` expects {expected}, got {got} elements"))]
    WrongArity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[snafu(display("malformed: `{command}` argument {index} has the wrong shape"))]
    BadArgument { command: &'static str, index: usize },
}

/// Options shared by `CHANGES` and `CHANGES_SUB`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChangesOptions {
    #[serde(default)]
    pub since: Option<Seq>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub kinds: Option<Vec<u32>>,
    #[serde(default)]
    pub authors: Option<Vec<PublicKey>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Carried as a raw JSON value: structural/identity/signature checks
    /// are `everelay_core::validate`'s job, not the parser's.
    Event(serde_json::Value),
    Req {
        sub_id: String,
        filters: Vec<Filter>,
    },
    Close {
        sub_id: String,
    },
    Changes(ChangesOptions),
    LastSeq,
    ChangesSub {
        sub_id: String,
        options: ChangesOptions,
    },
    ChangesUnsub {
        sub_id: String,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|_| ParseError::NotJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ParseError> {
        let array = value.as_array().ok_or(ParseError::NotAnArray)?;
        let tag = array.first().ok_or(ParseError::EmptyArray)?;
        let tag = tag.as_str().ok_or(ParseError::TagNotAString)?;

        match tag {
            "EVENT" => {
                if array.len() != 2 {
                    return Err(ParseError::WrongArity {
                        command: "EVENT",
                        expected: "2",
                        got: array.len(),
                    });
                }
                Ok(ClientMessage::Event(array[1].clone()))
            }
            "REQ" => {
                if array.len() < 3 {
                    return Err(ParseError::WrongArity {
                        command: "REQ",
                        expected: ">= 3",
                        got: array.len(),
                    });
                }
                let sub_id = parse_sub_id("REQ", &array[1], 1)?;
                let filters = array[2..]
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        serde_json::from_value(v.clone())
                            .map_err(|_| ParseError::BadArgument {
                                command: "REQ",
                                index: i + 2,
                            })
                    })
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req { sub_id, filters })
            }
            "CLOSE" => {
                if array.len() != 2 {
                    return Err(ParseError::WrongArity {
                        command: "CLOSE",
                        expected: "2",
                        got: array.len(),
                    });
                }
                Ok(ClientMessage::Close {
                    sub_id: parse_sub_id("CLOSE", &array[1], 1)?,
                })
            }
            "CHANGES" => {
                if array.len() != 2 {
                    return Err(ParseError::WrongArity {
                        command: "CHANGES",
                        expected: "2",
                        got: array.len(),
                    });
                }
                let options = serde_json::from_value(array[1].clone()).map_err(|_| {
                    ParseError::BadArgument {
                        command: "CHANGES",
                        index: 1,
                    }
                })?;
                Ok(ClientMessage::Changes(options))
            }
            "LASTSEQ" => {
                if array.len() != 1 {
                    return Err(ParseError::WrongArity {
                        command: "LASTSEQ",
                        expected: "1",
                        got: array.len(),
                    });
                }
                Ok(ClientMessage::LastSeq)
            }
            "CHANGES_SUB" => {
                if array.len() != 3 {
                    return Err(ParseError::WrongArity {
                        command: "CHANGES_SUB",
                        expected: "3",
                        got: array.len(),
                    });
                }
                let sub_id = parse_sub_id("CHANGES_SUB", &array[1], 1)?;
                let options = serde_json::from_value(array[2].clone()).map_err(|_| {
                    ParseError::BadArgument {
                        command: "CHANGES_SUB",
                        index: 2,
                    }
                })?;
                Ok(ClientMessage::ChangesSub { sub_id, options })
            }
            "CHANGES_UNSUB" => {
                if array.len() != 2 {
                    return Err(ParseError::WrongArity {
                        command: "CHANGES_UNSUB",
                        expected: "2",
                        got: array.len(),
                    });
                }
                Ok(ClientMessage::ChangesUnsub {
                    sub_id: parse_sub_id("CHANGES_UNSUB", &array[1], 1)?,
                })
            }
            other => Err(ParseError::UnknownCommand {
                tag: other.to_string(),
            }),
        }
    }
}

fn parse_sub_id(
    command: &'static str,
    value: &serde_json::Value,
    index: usize,
) -> Result<String, ParseError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(ParseError::BadArgument { command, index })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event() {
        let msg = ClientMessage::parse(r#"["EVENT", {"id": "x"}]"#).unwrap();
        assert!(matches!(msg, ClientMessage::Event(_)));
    }

    #[test]
    fn parses_req_with_multiple_filters() {
        let msg = ClientMessage::parse(r#"["REQ", "sub1", {"kinds":[1]}, {"kinds":[2]}]"#).unwrap();
        match msg {
            ClientMessage::Req { sub_id, filters } => {
                assert_eq!(sub_id, "sub1");
                assert_eq!(filters.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn req_requires_at_least_one_filter() {
        let err = ClientMessage::parse(r#"["REQ", "sub1"]"#).unwrap_err();
        assert!(matches!(err, ParseError::WrongArity { command: "REQ", .. }));
    }

    #[test]
    fn rejects_unknown_command() {
        let err = ClientMessage::parse(r#"["WAT"]"#).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownCommand {
                tag: "WAT".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_array() {
        assert_eq!(ClientMessage::parse(r#"{"a":1}"#).unwrap_err(), ParseError::NotAnArray);
    }

    #[test]
    fn rejects_empty_array() {
        assert_eq!(ClientMessage::parse("[]").unwrap_err(), ParseError::EmptyArray);
    }

    #[test]
    fn parses_lastseq() {
        assert_eq!(ClientMessage::parse(r#"["LASTSEQ"]"#).unwrap(), ClientMessage::LastSeq);
    }

    #[test]
    fn parses_changes_sub() {
        let msg =
            ClientMessage::parse(r#"["CHANGES_SUB", "feed", {"since": 5, "kinds": [40001]}]"#)
                .unwrap();
        match msg {
            ClientMessage::ChangesSub { sub_id, options } => {
                assert_eq!(sub_id, "feed");
                assert_eq!(options.since, Some(5));
                assert_eq!(options.kinds, Some(vec![40001]));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
