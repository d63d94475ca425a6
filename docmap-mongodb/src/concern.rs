//! Conversion of connection settings and write options into driver options.

use mongodb::options::{Acknowledgment, ClientOptions, Credential, WriteConcern};

use docmap_core::config::{ConnectionConfig, WriteAck, WriteOptions};

pub(crate) fn acknowledgment(ack: &WriteAck) -> Acknowledgment {
    match ack {
        WriteAck::Nodes(count) => Acknowledgment::Nodes(*count),
        WriteAck::Tag(tag) if tag == "majority" => Acknowledgment::Majority,
        WriteAck::Tag(tag) => Acknowledgment::Custom(tag.clone()),
    }
}

/// The connection-wide write concern.
pub(crate) fn connection_concern(config: &ConnectionConfig) -> WriteConcern {
    let mut concern = WriteConcern::default();
    concern.w = Some(acknowledgment(&config.write_concern));
    concern.w_timeout = config.write_timeout();
    concern
}

/// The write concern of a single call, or `None` to keep the connection's.
pub(crate) fn call_concern(options: &WriteOptions) -> Option<WriteConcern> {
    if options.ack.is_none() && options.timeout.is_none() && options.journal.is_none() {
        return None;
    }

    let mut concern = WriteConcern::default();
    concern.w = options.ack.as_ref().map(acknowledgment);
    concern.w_timeout = options.timeout;
    concern.journal = options.journal;
    Some(concern)
}

/// Applies everything in `config` except the host, which is part of the parsed connection string.
pub(crate) fn apply_config(options: &mut ClientOptions, config: &ConnectionConfig) {
    if let Some(username) = &config.username {
        let mut credential = Credential::default();
        credential.username = Some(username.clone());
        credential.password = config.password.clone();
        credential.source = Some(config.database.clone());
        options.credential = Some(credential);
    }

    if let Some(replica_set) = &config.replica_set {
        options.repl_set_name = Some(replica_set.clone());
    }

    if let Some(timeout) = config.connect_timeout() {
        options.connect_timeout = Some(timeout);
    }

    options.write_concern = Some(connection_concern(config));
}
