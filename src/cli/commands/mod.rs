mod user;

pub use user::{
    cmd_user_add, cmd_user_list, cmd_user_remove, cmd_user_set_active, cmd_user_show,
};
