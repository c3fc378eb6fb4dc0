use std::sync::Arc;

use crate::config::Config;
use crate::services::membership::MembershipService;
use crate::services::passwordless::MagicLinkSender;
use crate::store::sent_link_repository::SentLinkRepository;

#[derive(Clone)]
pub struct AppState {
    pub membership: Arc<dyn MembershipService>,
    pub magic_link: Arc<dyn MagicLinkSender>,
    pub sent_links: Arc<dyn SentLinkRepository>,
    pub config: Arc<Config>,
}
