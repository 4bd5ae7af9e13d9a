use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::Stanza;
use futures::{StreamExt, TryStreamExt};
use log::{debug, info, log_enabled, trace, warn, Level};

/// A connection to NWWS-OI.
///
/// `Connection` is 1:1 with an underlying XMPP session. Failures are
/// generally unrecoverable; the supervisor in [`crate::stream`] owns retry.
pub struct Connection {
    client: tokio_xmpp::SimpleClient,
    leave_message: xmpp_parsers::Element,
}

impl Connection {
    /// Connect, authenticate, and join the NWWS MUC.
    pub async fn new(config: &Config) -> Result<Self> {
        let jid = config.jid();
        let password = config.xmpp_password.clone().unwrap_or_default();

        info!("connecting to {}", config.nwwsoi.server.hostname());
        let mut client = tokio_xmpp::SimpleClient::new(&jid, password)
            .await
            .map_err(Error::from)?;
        let jid = client.bound_jid().clone();
        debug!("connected as {}", &jid);

        let room = config.muc_jid();
        debug!("joining channel {}", &room);

        // Ask for a few minutes of room history so a restart sees context
        let join = muc_presence(
            jid.clone(),
            room.clone(),
            xmpp_parsers::presence::Type::None,
            Some(300),
        );
        // Unavailable presence to the room is how an occupant exits
        // (XEP-0045); built now so shutdown always has it at hand
        let leave_message = muc_presence(
            jid.clone(),
            room.clone(),
            xmpp_parsers::presence::Type::Unavailable,
            None,
        )
        .into();

        client.send_stanza(join).await?;
        wait_for_self_presence(&mut client).await?;

        info!("joined {} as {}", &room, &jid);

        Ok(Self {
            client,
            leave_message,
        })
    }

    /// Terminate the connection as gracefully as possible.
    pub async fn end(self) {
        let mut client = self.client;

        // Attempt to leave the room, ignoring errors
        client.send_stanza(self.leave_message).await.ok();

        // Attempt to end the stream, ignoring errors
        client.end().await.ok();

        // Dropping client closes the connection
    }

    /// Receive the next usable product stanza.
    ///
    /// Groupchat noise (warning banners, subject lines, presence churn) is
    /// filtered here; IQs are answered per RFC 6120.
    pub async fn next_stanza(&mut self) -> Result<Stanza> {
        loop {
            let element = self.client.next().await.ok_or(Error::StreamEnded)??;

            if log_enabled!(Level::Trace) {
                let mut xml = Vec::new();
                if element
                    .write_to(&mut std::io::Cursor::new(&mut xml))
                    .is_ok()
                {
                    trace!("received: {}", String::from_utf8_lossy(&xml));
                }
            }

            if element.is("message", "jabber:client") {
                if let Ok(stanza) = Stanza::try_from(element.clone()) {
                    return Ok(stanza);
                }
                debug!("ignoring unusable message stanza");
            } else if element.is("iq", "jabber:client") {
                let iq = xmpp_parsers::iq::Iq::try_from(element)?;
                self.refuse_iq(iq).await?;
            } else if element.is("presence", "jabber:client") {
                trace!("presence: {:?}", element);
            } else {
                warn!("unhandled stanza: {:?}", element);
            }
        }
    }

    /// We implement no IQ semantics, so a get/set addressed to us is
    /// answered with `service-unavailable` (RFC 6120 §8.4); results and
    /// errors need no reply.
    async fn refuse_iq(&mut self, iq: xmpp_parsers::iq::Iq) -> Result<()> {
        use xmpp_parsers::iq::{Iq, IqType};
        use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

        if !matches!(iq.payload, IqType::Get(_) | IqType::Set(_)) {
            return Ok(());
        }

        debug!("refusing IQ {} with service-unavailable", iq.id);
        let refusal = Iq {
            from: iq.to,
            to: iq.from,
            id: iq.id,
            payload: IqType::Error(StanzaError {
                type_: ErrorType::Cancel,
                by: None,
                defined_condition: DefinedCondition::ServiceUnavailable,
                texts: Default::default(),
                other: None,
            }),
        };
        self.client.send_stanza(refusal).await?;
        Ok(())
    }
}

/// Build a presence stanza addressed to the room, with or without a history
/// request.
fn muc_presence(
    from: jid::Jid,
    room: jid::FullJid,
    kind: xmpp_parsers::presence::Type,
    history_seconds: Option<u32>,
) -> xmpp_parsers::presence::Presence {
    let muc = xmpp_parsers::muc::Muc {
        password: None,
        history: history_seconds.map(|seconds| xmpp_parsers::muc::muc::History {
            maxchars: None,
            maxstanzas: None,
            seconds: Some(seconds),
            since: None,
        }),
    };

    xmpp_parsers::presence::Presence::new(kind)
        .with_from(from)
        .with_to(room)
        .with_payloads(vec![muc.into()])
}

/// The room confirms a join by reflecting our own occupant presence back at
/// us (MUC status 110). Everything else on the wire until then is other
/// occupants arriving.
async fn wait_for_self_presence(client: &mut tokio_xmpp::SimpleClient) -> Result<()> {
    loop {
        let element = client.try_next().await?.ok_or(Error::StreamEnded)?;

        let presence = match xmpp_parsers::presence::Presence::try_from(element) {
            Ok(presence) => presence,
            Err(_) => continue,
        };

        let is_ours = presence
            .payloads
            .into_iter()
            .filter_map(|payload| xmpp_parsers::muc::MucUser::try_from(payload).ok())
            .any(|muc_user| {
                muc_user
                    .status
                    .contains(&xmpp_parsers::muc::user::Status::SelfPresence)
            });

        if is_ours {
            return Ok(());
        }
    }
}
