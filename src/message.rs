use chrono::{DateTime, FixedOffset};

/// One usable product stanza from the NWWS-OI groupchat.
///
/// The interesting payload is the `<x xmlns="nwws-oi">` element: its text
/// is the product body and its attributes carry the WMO routing metadata.
/// Stanzas without it fall back to the plain `<body>`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Stanza {
    /// Six character WMO product ID, where present.
    pub ttaaii: Option<String>,
    /// Four character issuing office, where present.
    pub cccc: Option<String>,
    /// AWIPS ID / AFOS PIL, where present.
    pub awips_id: Option<String>,
    /// Issuance time from the `issue` attribute.
    pub issue: Option<DateTime<FixedOffset>>,
    /// Upstream ingest process id + sequence; gaps indicate loss.
    pub id: Option<String>,
    /// XEP-0203 delayed-delivery stamp, when the relay added one.
    pub delay_stamp: Option<DateTime<FixedOffset>>,
    /// LDM sequence number prepended to the body, when present.
    pub ldm_sequence_number: Option<u32>,
    /// The product text, after LDM and newline repair.
    pub body: String,
}

impl TryFrom<xmpp_parsers::Element> for Stanza {
    type Error = ();

    fn try_from(value: xmpp_parsers::Element) -> Result<Self, Self::Error> {
        xmpp_parsers::message::Message::try_from(value)
            .ok()
            .and_then(|msg| Self::try_from(msg).ok())
            .ok_or(())
    }
}

impl TryFrom<xmpp_parsers::message::Message> for Stanza {
    type Error = xmpp_parsers::message::Message;

    fn try_from(value: xmpp_parsers::message::Message) -> Result<Self, Self::Error> {
        if value.type_ != xmpp_parsers::message::MessageType::Groupchat {
            return Err(value);
        }

        let delay_stamp = value
            .payloads
            .iter()
            .find(|p| p.is("delay", "urn:xmpp:delay"))
            .and_then(|delay| delay.attr("stamp"))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok());

        let oi = value.payloads.iter().find(|p| p.is("x", "nwws-oi"));

        let raw = match oi {
            Some(oi) => oi.text(),
            None => match value.bodies.get("") {
                Some(body) => body.0.clone(),
                None => return Err(value),
            },
        };

        // The federal terms-of-use banner arrives as a plain groupchat body
        if raw.trim_start().starts_with("**WARNING**") {
            return Err(value);
        }

        // Some messages have every \n replaced with \n\n; detect and undo
        let raw = if raw.matches('\n').count() == raw.matches("\n\n").count() * 2 {
            raw.replace("\n\n", "\n")
        } else {
            raw
        };

        // Fish out the LDM sequence number, if any
        let (ldm_sequence_number, body) = match {
            let mut i = raw.splitn(3, '\n');
            (i.next(), i.next().and_then(|s| s.trim().parse().ok()), i.next())
        } {
            (Some(""), Some(n), Some(rest)) => (Some(n), rest.to_string()),
            _ => (None, raw),
        };

        if body.trim().is_empty() {
            return Err(value);
        }

        let attr = |name: &str| {
            oi.and_then(|oi| oi.attr(name))
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Ok(Self {
            ttaaii: attr("ttaaii"),
            cccc: attr("cccc"),
            awips_id: attr("awipsid"),
            issue: oi
                .and_then(|oi| oi.attr("issue"))
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok()),
            id: attr("id"),
            delay_stamp,
            ldm_sequence_number,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stanza(xml: &str) -> Result<Stanza, ()> {
        let element: xmpp_parsers::Element = xml.parse().unwrap();
        let msg: xmpp_parsers::message::Message = element.try_into().unwrap();

        Stanza::try_from(msg).map_err(|_| ())
    }

    #[test]
    fn rejects_banner() {
        assert_eq!(
            stanza("<message xmlns=\"jabber:client\" from=\"nwws-oi.weather.gov\" to=\"user@nwws-oi.weather.gov/r\" type=\"groupchat\"><subject>US Federal Government</subject><body>**WARNING**WARNING**WARNING**\n\nThis is a United States Federal Government computer system.</body></message>"),
            Err(())
        );
    }

    #[test]
    fn rejects_subject_only() {
        assert_eq!(
            stanza("<message xmlns=\"jabber:client\" from=\"nwws@conference.nwws-oi.weather.gov\" to=\"user@nwws-oi.weather.gov/r\" type=\"groupchat\"><subject>National Weather Wire Service Open Interface</subject></message>"),
            Err(())
        );
    }

    #[test]
    fn rejects_non_groupchat() {
        assert_eq!(
            stanza("<message xmlns=\"jabber:client\" to=\"user@nwws-oi.weather.gov/r\"><body>direct message</body></message>"),
            Err(())
        );
    }

    #[test]
    fn extracts_oi_payload() {
        let s = stanza("<message xmlns=\"jabber:client\" to=\"user@nwws-oi.weather.gov/r\" type=\"groupchat\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"><body>KSGX issues TOR</body><x xmlns=\"nwws-oi\" cccc=\"KSGX\" ttaaii=\"WFUS54\" issue=\"2026-02-13T03:40:00Z\" awipsid=\"TORSGX\" id=\"14425.25117\"><![CDATA[\n\n987\n\nWFUS54 KSGX 130340\n\nTORSGX\n\nBULLETIN - EAS ACTIVATION REQUESTED\n\n]]></x><delay xmlns=\"urn:xmpp:delay\" stamp=\"2026-02-13T03:40:11.810Z\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"/></message>").unwrap();

        assert_eq!(s.cccc.as_deref(), Some("KSGX"));
        assert_eq!(s.ttaaii.as_deref(), Some("WFUS54"));
        assert_eq!(s.awips_id.as_deref(), Some("TORSGX"));
        assert_eq!(s.ldm_sequence_number, Some(987));
        assert!(s.delay_stamp.is_some());
        assert!(s.issue.is_some());
        assert_eq!(
            s.body,
            "WFUS54 KSGX 130340\nTORSGX\nBULLETIN - EAS ACTIVATION REQUESTED\n"
        );
    }

    #[test]
    fn body_fallback_without_oi_element() {
        let s = stanza("<message xmlns=\"jabber:client\" to=\"user@nwws-oi.weather.gov/r\" type=\"groupchat\" from=\"nwws@conference.nwws-oi.weather.gov/nwws-oi\"><body>KLMK issues RRM valid 2026-02-13T03:40:00Z</body></message>").unwrap();
        assert_eq!(s.cccc, None);
        assert_eq!(s.body, "KLMK issues RRM valid 2026-02-13T03:40:00Z");
    }
}
