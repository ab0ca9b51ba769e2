// orderflow/payments/src/services/requester.rs

/// Permission that lets control-panel users act on any order.
pub const MANAGE_ORDERS: &str = "commerce-manageOrders";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestChannel {
  #[default]
  Site,
  ControlPanel,
}

/// Who is asking, passed explicitly into every payment operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequesterContext {
  pub user_id: Option<i64>,
  pub permissions: Vec<String>,
  pub channel: RequestChannel,
  pub accepts_json: bool,
  /// Number of the session's active cart, if any.
  pub cart_number: Option<String>,
}

impl RequesterContext {
  pub fn site() -> Self {
    Self::default()
  }

  pub fn with_user(mut self, user_id: i64) -> Self {
    self.user_id = Some(user_id);
    self
  }

  pub fn with_cart(mut self, number: impl Into<String>) -> Self {
    self.cart_number = Some(number.into());
    self
  }

  pub fn is_site(&self) -> bool {
    self.channel == RequestChannel::Site
  }

  pub fn has_permission(&self, permission: &str) -> bool {
    self.permissions.iter().any(|p| p.eq_ignore_ascii_case(permission))
  }

  pub fn can_manage_orders(&self) -> bool {
    self.channel == RequestChannel::ControlPanel && self.user_id.is_some() && self.has_permission(MANAGE_ORDERS)
  }
}
