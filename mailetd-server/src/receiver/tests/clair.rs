/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use crate::{
    receiver::test_helpers::{get_regular_config, test_context},
    test_receiver,
};
use mailetd_common::{Address, MailState};

#[tokio::test]
async fn test_receiver_1() {
    assert!(test_receiver! {
        [
            "HELO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "Subject: hello\r\n",
            "\r\n",
            "mail content wow\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.6.0 Message received, queued for delivery\r\n",
            "221 2.0.0 Service closing transmission channel\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn ehlo_lists_extensions() {
    assert!(test_receiver! {
        ["EHLO mail.example.com\r\n", "QUIT\r\n"].concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250-testserver.com Hello mail.example.com\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250-SIZE 20000000\r\n",
            "250 AUTH PLAIN LOGIN\r\n",
            "221 2.0.0 Service closing transmission channel\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn ehlo_without_auth() {
    let config = super::config_with(|config| {
        config.server.smtp.auth.mode = mailetd_config::AuthMode::Disabled;
    });

    assert!(test_receiver! {
        with_config => config,
        ["EHLO foo\r\n", "AUTH PLAIN\r\n"].concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250-testserver.com Hello foo\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250 SIZE 20000000\r\n",
            "502 5.5.1 Command not implemented\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn invalid_helo() {
    assert!(test_receiver! {
        ["HELO\r\n", "HELO foo bar\r\n", "EHLO [not.an.ip]\r\n", "HELO [127.0.0.1]\r\n"].concat(),
        [
            "220 testserver.com Service ready\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "250 testserver.com Hello [127.0.0.1]\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn unknown_and_malformed_commands() {
    assert!(test_receiver! {
        ["foo\r\n", "\r\n", " HELO foo\r\n", "HE1LO foo\r\n", "helo foo\r\n"].concat(),
        [
            "220 testserver.com Service ready\r\n",
            "500 5.5.1 Command unrecognized\r\n",
            "500 5.5.2 Syntax error\r\n",
            "500 5.5.2 Syntax error\r\n",
            "500 5.5.1 Command unrecognized\r\n",
            "250 testserver.com Hello foo\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn bad_sequences() {
    assert!(test_receiver! {
        [
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "HELO foo\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "DATA\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "250 testserver.com Hello foo\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "250 2.1.0 Sender OK\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
            "503 5.5.1 Bad sequence of commands\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn misc_commands() {
    assert!(test_receiver! {
        [
            "NOOP\r\n",
            "HELP\r\n",
            "VRFY alice\r\n",
            "VRFY\r\n",
            "EXPN staff\r\n",
            "RSET now\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 2.0.0 Ok\r\n",
            "214 2.0.0 See RFC 5321 for the supported commands\r\n",
            "252 2.5.2 Cannot VRFY user, but will accept message and attempt delivery\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "502 5.5.1 Command not implemented\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn mail_and_rcpt_arguments() {
    assert!(test_receiver! {
        [
            "HELO foo\r\n",
            "MAIL FROM:john@doe.com\r\n",
            "MAIL FROM:<john@doe.com> SIZE=abc\r\n",
            "MAIL FROM:<john@doe.com> BODY=BINARYMIME\r\n",
            "MAIL FROM:<john@doe.com> RET=FULL\r\n",
            "MAIL FROM:<john@doe.com> SIZE=100 BODY=8BITMIME SMTPUTF8\r\n",
            "RCPT TO:<>\r\n",
            "RCPT TO:<alice@testserver.com> FOO=BAR\r\n",
            "RCPT TO:<alice@testserver.com> NOTIFY=NEVER\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "504 5.5.4 Command parameter not implemented\r\n",
            "250 2.1.0 Sender OK\r\n",
            "501 5.5.4 Syntax error in parameters or arguments\r\n",
            "504 5.5.4 Command parameter not implemented\r\n",
            "250 2.1.5 Recipient OK\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn local_recipients() {
    assert!(test_receiver! {
        [
            "HELO foo\r\n",
            "MAIL FROM:<>\r\n",
            "RCPT TO:<nobody@testserver.com>\r\n",
            "RCPT TO:<postmaster>\r\n",
            "RCPT TO:<Postmaster@TestServer.com>\r\n",
            "RCPT TO:<bob@testserver.com>\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "550 5.1.1 Mailbox unavailable\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn relay_from_authorized_network() {
    assert!(test_receiver! {
        [
            "HELO foo\r\n",
            "MAIL FROM:<alice@testserver.com>\r\n",
            "RCPT TO:<friend@remote.org>\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn relay_denied() {
    assert!(test_receiver! {
        from => super::REMOTE_CLIENT,
        with_context => test_context(get_regular_config()).unwrap(),
        [
            "HELO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<friend@remote.org>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "530 5.7.0 Authentication required\r\n",
            "250 2.1.5 Recipient OK\r\n",
        ]
        .concat()
    }
    .is_ok());

    assert!(test_receiver! {
        from => super::REMOTE_CLIENT,
        with_context => test_context(super::auth_announced()).unwrap(),
        [
            "HELO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<friend@remote.org>\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "550 5.7.1 Relaying denied\r\n",
        ]
        .concat()
    }
    .is_ok());
}

#[tokio::test]
async fn envelope_and_content_are_queued() {
    let context = test_context(get_regular_config()).unwrap();

    assert!(test_receiver! {
        with_context => context.clone(),
        [
            "EHLO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "RCPT TO:<bob@testserver.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "Subject: dots\r\n",
            "\r\n",
            "..leading dot\r\n",
            ".\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250-testserver.com Hello foo\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250-SIZE 20000000\r\n",
            "250 AUTH PLAIN LOGIN\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.6.0 Message received, queued for delivery\r\n",
        ]
        .concat()
    }
    .is_ok());

    let entries = context.queue.browse().unwrap();
    assert_eq!(entries.len(), 1);
    let mail = context.queue.retrieve(&entries[0].key).unwrap().unwrap();

    assert_eq!(mail.state, MailState::root());
    assert_eq!(mail.sender, Some("john@doe.com".parse::<Address>().unwrap()));
    assert_eq!(
        mail.recipients(),
        [
            "alice@testserver.com".parse::<Address>().unwrap(),
            "bob@testserver.com".parse::<Address>().unwrap(),
        ]
    );
    assert_eq!(mail.remote_addr, "127.0.0.1".parse::<std::net::IpAddr>().unwrap());
    assert_eq!(
        mail.attributes.get("mailetd.helo"),
        Some(&mailetd_common::re::serde_json::json!("foo"))
    );

    let content = String::from_utf8(mail.content().unwrap().into_owned()).unwrap();
    assert!(content.starts_with("Received: from foo (127.0.0.1)\r\n\tby testserver.com (mailetd) with ESMTP id "));
    assert!(content.ends_with("Subject: dots\r\n\r\n.leading dot\r\n"));
}

#[tokio::test]
async fn several_mails_in_one_session() {
    let context = test_context(get_regular_config()).unwrap();

    assert!(test_receiver! {
        with_context => context.clone(),
        [
            "HELO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "first\r\n",
            ".\r\n",
            "MAIL FROM:<jane@doe.com>\r\n",
            "RCPT TO:<bob@testserver.com>\r\n",
            "DATA\r\n",
            "second\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.6.0 Message received, queued for delivery\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.6.0 Message received, queued for delivery\r\n",
            "221 2.0.0 Service closing transmission channel\r\n",
        ]
        .concat()
    }
    .is_ok());

    let mut senders = context
        .queue
        .browse()
        .unwrap()
        .into_iter()
        .map(|entry| context.queue.retrieve(&entry.key).unwrap().unwrap())
        .map(|mail| mail.sender.unwrap().full().to_string())
        .collect::<Vec<_>>();
    senders.sort();
    assert_eq!(senders, vec!["jane@doe.com", "john@doe.com"]);
}

#[tokio::test]
async fn connection_closed_by_client() {
    let context = test_context(get_regular_config()).unwrap();

    assert!(test_receiver! {
        with_context => context.clone(),
        [
            "HELO foo\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<alice@testserver.com>\r\n",
            "DATA\r\n",
            "unterminated\r\n",
        ]
        .concat(),
        [
            "220 testserver.com Service ready\r\n",
            "250 testserver.com Hello foo\r\n",
            "250 2.1.0 Sender OK\r\n",
            "250 2.1.5 Recipient OK\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
        ]
        .concat()
    }
    .is_ok());

    assert_eq!(context.queue.size().unwrap(), 0);
}
