mod keys;
pub mod nip01;
pub mod tag_parsing;

pub use keys::{
    Keypair, npub_to_public_key, nsec_to_private_key, parse_public_key, parse_secret_key,
    private_key_to_nsec, public_key_to_npub,
};
pub use nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, finalize_event, generate_secret_key,
    get_event_hash, get_public_key, get_public_key_hex, validate_event, verify_event,
};
pub use tag_parsing::tag;
