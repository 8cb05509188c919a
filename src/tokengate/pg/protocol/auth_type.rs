use strum::Display;

/// The authentication request codes carried in the first 4 bytes of an
/// Authentication ('R') message payload.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum AuthType {
    Ok = 0,
    KerberosV5 = 2,
    ClearText = 3,
    MD5 = 5,
    SCM = 6,
    GSS = 7,
    GSSContinue = 8,
    SSPI = 9,
    SASL = 10,
    SASLContinue = 11,
    SASLFinal = 12,
}

impl AuthType {
    pub fn as_i32(&self) -> i32 {
        *self as u8 as i32
    }

    pub fn from_i32(i: i32) -> Option<Self> {
        Some(match i {
            0 => AuthType::Ok,
            2 => AuthType::KerberosV5,
            3 => AuthType::ClearText,
            5 => AuthType::MD5,
            6 => AuthType::SCM,
            7 => AuthType::GSS,
            8 => AuthType::GSSContinue,
            9 => AuthType::SSPI,
            10 => AuthType::SASL,
            11 => AuthType::SASLContinue,
            12 => AuthType::SASLFinal,
            _ => return None,
        })
    }
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::Ok
    }
}
