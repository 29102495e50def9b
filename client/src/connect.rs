//! establish connection of a route: tcp, optional proxy tunnel, tls and protocol handshake.

use std::sync::Mutex;

use tokio::net::TcpStream;
use tracing::trace;

use crate::{
    address::Protocol,
    connection::{Connection, Transport},
    error::{Error, FeatureError},
    route::Route,
    tls::stream::Io,
    transmitter::{Phase, Transmitter},
};

/// max number of CONNECT requests sent for one tunnel, including reconnects demanded by proxy.
#[cfg(feature = "http1")]
const MAX_TUNNEL_ATTEMPTS: usize = 21;

pub(crate) async fn connect(tx: &Transmitter, route: &Route) -> Result<Connection, Error> {
    let io = if route.requires_tunnel() {
        open_tunnel(tx, route).await?
    } else {
        connect_socket(tx, route).await?
    };

    let address = route.address();

    let (io, protocol) = if address.is_tls() {
        let connector = address.tls_connector.as_ref().ok_or(FeatureError::TlsNotEnabled)?;

        tx.events().secure_connect_start(tx.call_id());

        let (io, protocol) = tx
            .guard(Phase::Connect, connector.connect(address.host(), io, address.protocols()))
            .await?;

        // peer picked nothing we offered.
        let protocol = if address.protocols().contains(&protocol) {
            protocol
        } else {
            Protocol::Http11
        };

        tx.events().secure_connect_end(tx.call_id(), protocol);

        (io, protocol)
    } else if address.protocols() == [Protocol::H2PriorKnowledge] {
        (io, Protocol::H2PriorKnowledge)
    } else {
        (io, Protocol::Http11)
    };

    let transport = match protocol {
        Protocol::Http11 => Transport::H1(Mutex::new(Some(io))),
        Protocol::H2 | Protocol::H2PriorKnowledge => {
            #[cfg(feature = "http2")]
            {
                Transport::H2(tx.guard(Phase::Connect, crate::h2::Connection::handshake(io)).await?)
            }

            #[cfg(not(feature = "http2"))]
            {
                drop(io);
                return Err(FeatureError::Http2NotEnabled.into());
            }
        }
    };

    tx.events().connect_end(tx.call_id(), route, protocol);

    let conn = Connection::new(route.clone(), protocol, transport);
    trace!(target: "connect", "established {conn:?}");
    Ok(conn)
}

async fn connect_socket(tx: &Transmitter, route: &Route) -> Result<Box<dyn Io>, Error> {
    tx.events().connect_start(tx.call_id(), route.socket_addr(), route.proxy());

    let stream = tx.guard(Phase::Connect, TcpStream::connect(route.socket_addr())).await?;

    let _ = stream.set_nodelay(true);

    Ok(Box::new(stream))
}

#[cfg(not(feature = "http1"))]
async fn open_tunnel(_: &Transmitter, _: &Route) -> Result<Box<dyn Io>, Error> {
    Err(FeatureError::Http1NotEnabled.into())
}

/// connect to proxy and open a CONNECT tunnel to the origin. proxy authentication challenges are
/// answered by proxy authenticator of the address.
#[cfg(feature = "http1")]
async fn open_tunnel(tx: &Transmitter, route: &Route) -> Result<Box<dyn Io>, Error> {
    let mut req = tunnel::request(tx, route)?;
    let mut attempts = 0;

    loop {
        let mut io = connect_socket(tx, route).await?;
        match tunnel::create(tx, route, &mut io, &mut req, &mut attempts).await? {
            tunnel::Outcome::Open => return Ok(io),
            // proxy closed connection after auth challenge. retry on a new socket.
            tunnel::Outcome::Reconnect => {
                trace!(target: "connect", "proxy closed tunnel connection. reconnecting");
                tx.events().connect_end(tx.call_id(), route, Protocol::Http11);
            }
        }
    }
}

#[cfg(feature = "http1")]
mod tunnel {
    use bytes::{Bytes, BytesMut};
    use http::{
        HeaderValue, Method, StatusCode, Uri,
        header::{HOST, PROXY_AUTHENTICATE, USER_AGENT},
    };

    use crate::{
        error::{Error, ErrorResponse},
        h1::proto::{
            dispatcher::{read_body, read_head, write_buf},
            encode::{RequestTarget, encode_head},
        },
        request::{Request, clone_request},
        response::Response,
        route::Route,
        tls::stream::Io,
        transmitter::Transmitter,
    };

    use super::MAX_TUNNEL_ATTEMPTS;

    pub(super) enum Outcome {
        Open,
        Reconnect,
    }

    /// CONNECT request of a route. proxy authenticator is offered a preemptive challenge.
    pub(super) fn request(tx: &Transmitter, route: &Route) -> Result<Request, Error> {
        let address = route.address();
        let authority = if address.host().contains(':') {
            format!("[{}]:{}", address.host(), address.port())
        } else {
            format!("{}:{}", address.host(), address.port())
        };

        let mut req = Request::default();
        *req.method_mut() = Method::CONNECT;
        *req.uri_mut() = Uri::try_from(authority.as_str())?;

        let headers = req.headers_mut();
        headers.insert(HOST, HeaderValue::try_from(authority).map_err(http::Error::from)?);
        headers.insert("proxy-connection", HeaderValue::from_static("Keep-Alive"));
        headers.insert(USER_AGENT, tx.client().inner.user_agent.clone());

        let mut challenge = http::Response::new(Bytes::new());
        *challenge.status_mut() = StatusCode::PROXY_AUTHENTICATION_REQUIRED;
        challenge
            .headers_mut()
            .insert(PROXY_AUTHENTICATE, HeaderValue::from_static("tandem-preemptive"));
        let challenge = Response::new(challenge, clone_request(&req));

        Ok(address
            .proxy_authenticator
            .authenticate(Some(route), &challenge)?
            .unwrap_or(req))
    }

    pub(super) async fn create(
        tx: &Transmitter,
        route: &Route,
        io: &mut Box<dyn Io>,
        req: &mut Request,
        attempts: &mut usize,
    ) -> Result<Outcome, Error> {
        let mut buf = BytesMut::new();

        loop {
            *attempts += 1;
            if *attempts > MAX_TUNNEL_ATTEMPTS {
                return Err(Error::Std(
                    format!("too many tunnel connections attempted: {MAX_TUNNEL_ATTEMPTS}").into(),
                ));
            }

            buf.clear();
            encode_head(req.method(), req.uri(), req.headers(), RequestTarget::Authority, None, &mut buf);
            write_buf(tx, io, &buf).await?;
            buf.clear();

            let head = read_head(tx, io, &mut buf, &Method::CONNECT).await?;

            // body of CONNECT response should be empty. drain it when it's not.
            if !head.decoder.is_eof() {
                read_body(tx, io, &mut buf, head.decoder, usize::MAX).await?;
            }

            match head.res.status() {
                StatusCode::OK => {
                    // bytes sent by proxy before tls handshake would be lost.
                    if !buf.is_empty() {
                        return Err(Error::Std("tls tunnel buffered too many bytes".into()));
                    }
                    return Ok(Outcome::Open);
                }
                StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                    let keep_alive = head.keep_alive;
                    let challenge = Response::new(head.res.map(|_| Bytes::new()), clone_request(req));
                    *req = route
                        .address()
                        .proxy_authenticator
                        .authenticate(Some(route), &challenge)?
                        .ok_or(ErrorResponse {
                            expect_status: StatusCode::OK,
                            status: StatusCode::PROXY_AUTHENTICATION_REQUIRED,
                            description: "failed to authenticate with proxy",
                        })?;

                    if !keep_alive {
                        return Ok(Outcome::Reconnect);
                    }
                }
                status => {
                    return Err(ErrorResponse {
                        expect_status: StatusCode::OK,
                        status,
                        description: "unexpected response code for CONNECT",
                    }
                    .into());
                }
            }
        }
    }
}
