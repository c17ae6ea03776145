// 按表拆分的仓储实现
mod lock;
mod run;
mod setup_token;
mod tenant;
