use bytes::{BufMut, BytesMut};

use super::{
    buffer::{ProtoHeader, ProtoType},
    hash_password, CommandError, Result,
};
use crate::{
    cluster::Cluster,
    net::{Connection, Credentials},
    policy::AuthMode,
    ResultCode,
};

#[derive(Clone, Copy)]
enum AdminOp {
    ChangePassword = 3,
    Login = 20,
}

#[derive(Clone, Copy)]
enum AdminField {
    User = 0,
    Password = 1,
    OldPassword = 2,
    Credential = 3,
    ClearPassword = 4,
}

const HEADER_SIZE: usize = 24;
const HEADER_REMAINING: usize = HEADER_SIZE - 8;
const FIELD_HEADER_SIZE: usize = 5;

/// Security commands, framed separately from the record protocol.
pub(crate) struct AdminCommand;

impl AdminCommand {
    /// Authenticate a fresh connection. Called during connection open,
    /// before the connection is handed to anyone.
    pub async fn login(
        conn: &mut Connection,
        credentials: &Credentials,
        auth_mode: AuthMode,
    ) -> Result<()> {
        let mut fields = vec![
            (AdminField::User, credentials.user.clone().into_bytes()),
            (
                AdminField::Credential,
                credentials.password_hash.clone().into_bytes(),
            ),
        ];
        if auth_mode == AuthMode::External {
            if let Some(clear) = &credentials.clear_password {
                fields.push((AdminField::ClearPassword, clear.clone().into_bytes()));
            }
        }
        if auth_mode == AuthMode::Pki {
            // Identity comes from the client certificate.
            fields.clear();
        }

        let buf = encode(AdminOp::Login, &fields);
        conn.write(&buf).await?;

        let mut header = [0; HEADER_SIZE];
        conn.read(&mut header).await?;

        let proto = ProtoHeader::read_from(&mut &header[..8])?;
        let result_code = ResultCode::from(header[9]);

        // Drain the session token and whatever else the server appends.
        let remaining = proto.size - HEADER_REMAINING;
        if remaining > 0 {
            let mut rest = vec![0; remaining];
            conn.read(&mut rest).await?;
        }
        conn.finish_exchange();

        match result_code {
            ResultCode::Ok | ResultCode::SecurityNotEnabled => Ok(()),
            code => Err(CommandError::server(code)),
        }
    }

    /// Change a user's password on the server and re-key future
    /// connections of this cluster.
    pub async fn change_password(cluster: &Cluster, user: &str, password: &str) -> Result<()> {
        let old_hash = cluster
            .client_policy()
            .user_password
            .as_ref()
            .map(|(_, hash)| hash.clone())
            .unwrap_or_default();
        let new_hash = hash_password(password)?;

        let node = cluster.get_random_node().ok_or(CommandError::NoConnection)?;
        let mut conn = node.get_connection().await?;

        let fields = vec![
            (AdminField::User, user.as_bytes().to_vec()),
            (AdminField::OldPassword, old_hash.into_bytes()),
            (AdminField::Password, new_hash.clone().into_bytes()),
        ];
        let buf = encode(AdminOp::ChangePassword, &fields);

        let status = async {
            conn.write(&buf).await?;

            let mut header = [0; HEADER_SIZE];
            conn.read(&mut header).await?;
            conn.finish_exchange();
            Ok::<_, CommandError>(ResultCode::from(header[9]))
        }
        .await;

        match status {
            Ok(ResultCode::Ok) => {
                cluster
                    .change_password(user, password)
                    .map_err(|_| CommandError::server(ResultCode::InvalidCredential))?;
                Ok(())
            }
            Ok(code) => Err(CommandError::server(code)),
            Err(err) => {
                conn.invalidate().await;
                Err(err)
            }
        }
    }
}

fn encode(op: AdminOp, fields: &[(AdminField, Vec<u8>)]) -> Vec<u8> {
    let payload = fields
        .iter()
        .map(|(_, data)| FIELD_HEADER_SIZE + data.len())
        .sum::<usize>();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload);
    ProtoHeader::write_to(ProtoType::Admin, HEADER_REMAINING + payload, &mut buf);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u8(op as u8);
    buf.put_u8(fields.len() as u8);
    buf.put_bytes(0, 12);

    for (field, data) in fields {
        buf.put_u32(data.len() as u32 + 1);
        buf.put_u8(*field as u8);
        buf.put_slice(data);
    }

    buf.to_vec()
}
